use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime};
use tracing::error;

use crate::handlers::SharedState;
use crate::metrics::TierStats;
use crate::rate_limit_config::Tier;
use crate::rate_limiter::RateLimiter;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub rate_limits: RateLimitSnapshot,
}

#[derive(Debug, Serialize)]
pub struct RateLimitSnapshot {
    pub tracked_keys: usize,
    pub totals: TierStats,
    pub tiers: Vec<TierSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct TierSnapshot {
    pub tier: Tier,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub max_requests: u32,
    pub allowed: u64,
    pub denied: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub status: String,
    pub database: String,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

static START_TIME: std::sync::LazyLock<SystemTime> = std::sync::LazyLock::new(SystemTime::now);

pub struct HealthChecker {
    rate_limiter: RateLimiter,
}

impl HealthChecker {
    pub fn new(rate_limiter: RateLimiter) -> Self {
        Self { rate_limiter }
    }

    pub fn check_health(&self) -> HealthStatus {
        let now = SystemTime::now();
        let uptime = now.duration_since(*START_TIME).unwrap_or_default().as_secs();

        HealthStatus {
            status: "ok".to_string(),
            timestamp: now
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime,
            rate_limits: self.rate_limit_snapshot(),
        }
    }

    fn rate_limit_snapshot(&self) -> RateLimitSnapshot {
        let metrics = self.rate_limiter.metrics();
        let tiers = Tier::ALL
            .iter()
            .map(|&tier| {
                let rule = self.rate_limiter.rule(tier);
                let stats = metrics.tier(tier);
                TierSnapshot {
                    tier,
                    window: rule.window,
                    max_requests: rule.max_requests,
                    allowed: stats.allowed,
                    denied: stats.denied,
                }
            })
            .collect();

        RateLimitSnapshot {
            tracked_keys: self.rate_limiter.tracked_keys(),
            totals: metrics.global(),
            tiers,
        }
    }
}

/// Liveness plus limiter statistics
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthStatus> {
    Json(HealthChecker::new(state.rate_limiter.clone()).check_health())
}

/// Round trip to the registration store. The failure reason is only logged.
pub async fn database_health_check(
    State(state): State<SharedState>,
) -> (StatusCode, Json<ServiceStatus>) {
    let start = Instant::now();
    let result = state.store.ping().await;
    let response_time_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(()) => (
            StatusCode::OK,
            Json(ServiceStatus {
                status: "ok".to_string(),
                database: "connected".to_string(),
                response_time_ms,
                error: None,
            }),
        ),
        Err(e) => {
            error!(error = %e, "Database health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ServiceStatus {
                    status: "error".to_string(),
                    database: "disconnected".to_string(),
                    response_time_ms,
                    error: Some("Database unreachable".to_string()),
                }),
            )
        }
    }
}
