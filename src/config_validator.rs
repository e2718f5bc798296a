use reqwest::Url;

use crate::config::Config;
use crate::error::ApiError;
use crate::rate_limit_config::RateLimitConfig;

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the backend project URL
    pub fn validate_backend_url(url: &str) -> Result<(), ApiError> {
        if url.trim().is_empty() {
            return Err(ApiError::Configuration("SUPABASE_URL cannot be empty".to_string()));
        }

        let parsed = Url::parse(url)
            .map_err(|e| ApiError::Configuration(format!("SUPABASE_URL is not a valid URL: {}", e)))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ApiError::Configuration(
                "SUPABASE_URL must start with 'http://' or 'https://'".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates that a credential is present
    pub fn validate_key(name: &str, key: &str) -> Result<(), ApiError> {
        if key.trim().is_empty() {
            return Err(ApiError::Configuration(format!("{} cannot be empty", name)));
        }
        Ok(())
    }

    pub fn validate_mail_from(address: &str) -> Result<(), ApiError> {
        match address.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
            _ => Err(ApiError::Configuration(format!(
                "MAIL_FROM '{}' is not an email address",
                address
            ))),
        }
    }

    pub fn validate_unsubscribe_base(url: &str) -> Result<(), ApiError> {
        Url::parse(url)
            .map(|_| ())
            .map_err(|e| ApiError::Configuration(format!("UNSUBSCRIBE_BASE is not a valid URL: {}", e)))
    }

    /// Validates timing parameters
    pub fn validate_intervals(upstream_timeout_secs: u64, sweep_interval_secs: u64) -> Result<(), ApiError> {
        if upstream_timeout_secs == 0 {
            return Err(ApiError::Configuration(
                "UPSTREAM_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        if sweep_interval_secs == 0 {
            return Err(ApiError::Configuration(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn validate_rate_limits(config: &RateLimitConfig) -> Result<(), ApiError> {
        config.validate().map_err(ApiError::Configuration)
    }

    /// Validates the whole service configuration
    pub fn validate_config(config: &Config) -> Result<(), ApiError> {
        Self::validate_backend_url(&config.supabase_url)?;
        Self::validate_key("SUPABASE_KEY", &config.supabase_key)?;
        Self::validate_mail_from(&config.mail_from)?;
        Self::validate_unsubscribe_base(&config.unsubscribe_base)?;
        Self::validate_intervals(config.upstream_timeout_secs, config.sweep_interval_secs)?;

        if config.bind_addr.port() == 0 {
            return Err(ApiError::Configuration(
                "BIND_ADDR port must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
