//! Sliding-window request admission.
//!
//! Every `(tier, identity)` pair owns a log of admission timestamps. A check
//! prunes entries that fell out of the tier window, compares the remaining
//! count against the tier threshold and records the request only when it is
//! admitted. The whole sequence runs under the map shard lock for that key,
//! so concurrent checks for one key can never over-admit.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::metrics::AdmissionMetrics;
use crate::rate_limit_config::{RateLimitConfig, Tier, TierRule};

/// Clock abstraction so window arithmetic can be driven by tests.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_millis(&self) -> u64;
}

/// Monotonic clock backed by `Instant::now()`.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Manually advanced clock.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let millis = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Addresses one sliding window
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub tier: Tier,
    pub identity: String,
}

impl RateLimitKey {
    pub fn new(tier: Tier, identity: impl Into<String>) -> Self {
        Self {
            tier,
            identity: identity.into(),
        }
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tier, self.identity)
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed { remaining: u32 },
    Denied { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

/// Shared, cheaply cloneable limiter handle
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    config: RateLimitConfig,
    windows: DashMap<RateLimitKey, VecDeque<u64>>,
    clock: Arc<dyn Clock>,
    metrics: AdmissionMetrics,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                windows: DashMap::new(),
                clock,
                metrics: AdmissionMetrics::new(),
            }),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.inner.config
    }

    pub fn rule(&self, tier: Tier) -> &TierRule {
        self.inner.config.get_rule(tier)
    }

    pub fn metrics(&self) -> &AdmissionMetrics {
        &self.inner.metrics
    }

    /// Check and, if admitted, record one request for `identity` under `tier`.
    pub fn admit(&self, tier: Tier, identity: &str) -> Admission {
        self.check(&RateLimitKey::new(tier, identity))
    }

    pub fn check(&self, key: &RateLimitKey) -> Admission {
        let rule = self.inner.config.get_rule(key.tier);
        let window_ms = duration_millis(rule.window);
        let now = self.inner.clock.now_millis();

        let admission = {
            // The entry guard holds the shard lock until the end of this block.
            let mut window = self.inner.windows.entry(key.clone()).or_default();
            prune(&mut window, now, window_ms);

            let count = window.len() as u32;
            if count >= rule.max_requests {
                let oldest = window.front().copied().unwrap_or(now);
                let elapsed = now.saturating_sub(oldest);
                Admission::Denied {
                    retry_after: Duration::from_millis(window_ms.saturating_sub(elapsed)),
                }
            } else {
                window.push_back(now);
                Admission::Allowed {
                    remaining: rule.max_requests - count - 1,
                }
            }
        };

        match admission {
            Admission::Allowed { remaining } => {
                self.inner.metrics.record(key.tier, true);
                debug!(key = %key, remaining, "Request admitted");
            }
            Admission::Denied { retry_after } => {
                self.inner.metrics.record(key.tier, false);
                warn!(
                    tier = %key.tier,
                    identity = %key.identity,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Rate limit exceeded"
                );
            }
        }

        admission
    }

    /// Requests still admissible for a key, without recording anything
    pub fn remaining(&self, key: &RateLimitKey) -> u32 {
        let rule = self.inner.config.get_rule(key.tier);
        let window_ms = duration_millis(rule.window);
        let now = self.inner.clock.now_millis();

        let live = self
            .inner
            .windows
            .get(key)
            .map(|window| {
                window
                    .iter()
                    .filter(|&&ts| now.saturating_sub(ts) < window_ms)
                    .count() as u32
            })
            .unwrap_or(0);
        rule.max_requests.saturating_sub(live)
    }

    /// Number of windows currently held in memory
    pub fn tracked_keys(&self) -> usize {
        self.inner.windows.len()
    }

    /// Evict windows with no timestamp left inside their tier window.
    /// Returns the number of evicted keys.
    pub fn sweep(&self) -> usize {
        let now = self.inner.clock.now_millis();
        let before = self.inner.windows.len();

        self.inner.windows.retain(|key, window| {
            let window_ms = duration_millis(self.inner.config.get_rule(key.tier).window);
            prune(window, now, window_ms);
            !window.is_empty()
        });

        let evicted = before.saturating_sub(self.inner.windows.len());
        if evicted > 0 {
            debug!(
                evicted,
                remaining = self.inner.windows.len(),
                "Swept idle rate limit windows"
            );
        }
        evicted
    }

    /// Run `sweep` on a fixed interval until the runtime shuts down.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                limiter.sweep();
            }
        })
    }
}

fn prune(window: &mut VecDeque<u64>, now: u64, window_ms: u64) {
    while let Some(&oldest) = window.front() {
        if now.saturating_sub(oldest) >= window_ms {
            window.pop_front();
        } else {
            break;
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
