use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Named limiter tiers. The set is fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Account creation and email verification, per IP
    Strict,
    /// Registration writes and uploads, per IP
    Standard,
    /// Admin listing endpoints, per IP
    Admin,
    /// Outbound email triggers, per user
    Email,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Strict, Tier::Standard, Tier::Admin, Tier::Email];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Strict => "strict",
            Tier::Standard => "standard",
            Tier::Admin => "admin",
            Tier::Email => "email",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Window and threshold for one tier
#[derive(Debug, Clone, Serialize)]
pub struct TierRule {
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub max_requests: u32,
    pub error_message: String,
}

impl TierRule {
    pub fn new(window: Duration, max_requests: u32, error_message: impl Into<String>) -> Self {
        Self {
            window,
            max_requests,
            error_message: error_message.into(),
        }
    }

    pub fn strict() -> Self {
        Self::new(
            Duration::from_secs(60),
            5,
            "Too many attempts. Please wait a minute before trying again.",
        )
    }

    pub fn standard() -> Self {
        Self::new(
            Duration::from_secs(60),
            10,
            "Too many requests. Please try again later.",
        )
    }

    pub fn admin() -> Self {
        Self::new(
            Duration::from_secs(60),
            30,
            "Too many admin requests. Please slow down.",
        )
    }

    pub fn email() -> Self {
        Self::new(
            Duration::from_secs(300),
            5,
            "Too many emails requested. Please wait a few minutes before trying again.",
        )
    }

    /// Validate rule parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.max_requests == 0 {
            return Err("Max requests must be greater than 0".to_string());
        }
        if self.window.is_zero() {
            return Err("Window size must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Rules for every tier. Built once at startup and never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitConfig {
    rules: HashMap<Tier, TierRule>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let rules = HashMap::from([
            (Tier::Strict, TierRule::strict()),
            (Tier::Standard, TierRule::standard()),
            (Tier::Admin, TierRule::admin()),
            (Tier::Email, TierRule::email()),
        ]);
        Self { rules }
    }
}

impl RateLimitConfig {
    /// Replace the rule for a tier while building the configuration
    pub fn with_rule(mut self, tier: Tier, rule: TierRule) -> Self {
        self.rules.insert(tier, rule);
        self
    }

    /// Get the rule for a tier
    pub fn get_rule(&self, tier: Tier) -> &TierRule {
        // Default populates every tier and with_rule only replaces entries.
        &self.rules[&tier]
    }

    /// Longest window across all tiers
    pub fn max_window(&self) -> Duration {
        self.rules
            .values()
            .map(|rule| rule.window)
            .max()
            .unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), String> {
        for tier in Tier::ALL {
            self.get_rule(tier)
                .validate()
                .map_err(|e| format!("{} tier: {}", tier, e))?;
        }
        Ok(())
    }
}
