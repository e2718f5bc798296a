use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::rate_limit_config::Tier;

#[derive(Debug, Default)]
struct TierCounters {
    allowed: AtomicU64,
    denied: AtomicU64,
}

/// Point-in-time admission counts for one tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub allowed: u64,
    pub denied: u64,
}

impl TierStats {
    pub fn total(&self) -> u64 {
        self.allowed + self.denied
    }
}

/// Lock-free admission counters, one pair per tier
#[derive(Debug)]
pub struct AdmissionMetrics {
    tiers: HashMap<Tier, TierCounters>,
}

impl Default for AdmissionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionMetrics {
    pub fn new() -> Self {
        Self {
            tiers: Tier::ALL
                .into_iter()
                .map(|tier| (tier, TierCounters::default()))
                .collect(),
        }
    }

    pub fn record(&self, tier: Tier, allowed: bool) {
        let Some(counters) = self.tiers.get(&tier) else {
            return;
        };
        if allowed {
            counters.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn tier(&self, tier: Tier) -> TierStats {
        self.tiers
            .get(&tier)
            .map(|counters| TierStats {
                allowed: counters.allowed.load(Ordering::Relaxed),
                denied: counters.denied.load(Ordering::Relaxed),
            })
            .unwrap_or_default()
    }

    pub fn global(&self) -> TierStats {
        Tier::ALL
            .into_iter()
            .map(|tier| self.tier(tier))
            .fold(TierStats::default(), |acc, stats| TierStats {
                allowed: acc.allowed + stats.allowed,
                denied: acc.denied + stats.denied,
            })
    }
}
