// Mogulate usage metering: tier catalog, usage ledger, billing cycles and the quota gate
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod cycle;
mod rest;
mod storage;
mod tracker;
mod types;

pub use cycle::{BillingCycle, CyclePolicy};
pub use rest::PostgrestStorage;
pub use storage::{InMemoryStorage, UsageStorage};
pub use tracker::{QuotaDecision, UsageTracker};
pub use types::*;

// Error Types
#[derive(Error, Debug)]
pub enum UsageError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Invalid billing cycle policy: {0}")]
    InvalidPolicy(String),
    #[error("Actor not found: {0}")]
    ActorNotFound(String),
    #[error("Usage quota exceeded for {tier} tier, resets {next_reset}")]
    QuotaExceeded {
        tier: Tier,
        next_reset: DateTime<Utc>,
    },
}

pub type Result<T> = std::result::Result<T, UsageError>;

// Core Types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free, // 5 generations per cycle
    Starter, // 50 generations, $9/month
    Pro,     // 250 generations, $29/month
}

impl Tier {
    /// Parses a stored tier label. Anything unrecognised is treated as `free`
    /// so a bad profile row degrades to the most restrictive limits.
    pub fn from_label(label: &str) -> Tier {
        match label.trim().to_ascii_lowercase().as_str() {
            "starter" => Tier::Starter,
            "pro" => Tier::Pro,
            _ => Tier::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Starter => "starter",
            Tier::Pro => "pro",
        }
    }

    pub fn limits(&self) -> TierLimits {
        match self {
            Tier::Free => TierLimits {
                monthly_quota: 5,
                competitor_count: 3,
                include_descriptions: false,
                market_gap_count: 2,
                positioning_count: 1,
                feature_count: 5,
            },
            Tier::Starter => TierLimits {
                monthly_quota: 50,
                competitor_count: 5,
                include_descriptions: true,
                market_gap_count: 4,
                positioning_count: 2,
                feature_count: 10,
            },
            Tier::Pro => TierLimits {
                monthly_quota: 250,
                competitor_count: 10,
                include_descriptions: true,
                market_gap_count: 6,
                positioning_count: 3,
                feature_count: 20,
            },
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quota ceiling plus the result-shaping parameters for one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub monthly_quota: u64,
    pub competitor_count: usize,
    pub include_descriptions: bool,
    pub market_gap_count: usize,
    pub positioning_count: usize,
    pub feature_count: usize,
}
