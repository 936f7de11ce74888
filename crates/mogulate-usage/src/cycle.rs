use crate::UsageError;
use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How long one billing cycle lasts, measured from the actor's anchor.
///
/// A process uses exactly one policy for every endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CyclePolicy {
    /// Anchor plus one calendar month, with the day clamped to the month's end.
    #[default]
    CalendarMonth,
    FixedDays(u32),
}

impl CyclePolicy {
    pub fn cycle_end(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            CyclePolicy::CalendarMonth => start
                .checked_add_months(Months::new(1))
                .unwrap_or_else(|| start + Duration::days(30)),
            CyclePolicy::FixedDays(days) => start + Duration::days(i64::from(*days)),
        }
    }

    /// Computes the cycle containing `now` for the given anchor.
    ///
    /// Once a full cycle has elapsed the cycle restarts at `now`; the caller
    /// is responsible for persisting `now` as the new anchor.
    pub fn resolve(&self, anchor: DateTime<Utc>, now: DateTime<Utc>) -> BillingCycle {
        let end = self.cycle_end(anchor);
        if now >= end {
            BillingCycle {
                start: now,
                next_reset: self.cycle_end(now),
                elapsed: true,
            }
        } else {
            BillingCycle {
                start: anchor,
                next_reset: end,
                elapsed: false,
            }
        }
    }
}

impl FromStr for CyclePolicy {
    type Err = UsageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "calendar-month" | "calendar_month" | "monthly" => Ok(CyclePolicy::CalendarMonth),
            other => other
                .strip_suffix('d')
                .and_then(|days| days.parse::<u32>().ok())
                .filter(|days| *days > 0)
                .map(CyclePolicy::FixedDays)
                .ok_or_else(|| UsageError::InvalidPolicy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingCycle {
    pub start: DateTime<Utc>,
    pub next_reset: DateTime<Utc>,
    /// True when the stored anchor is stale and must move to `start`.
    pub elapsed: bool,
}
