use crate::{
    Actor, BillingCycle, CallKind, CyclePolicy, LedgerEntry, Result, Tier, TierLimits, UsageError,
    UsageStorage,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of the quota gate for one actor at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub tier: Tier,
    pub limits: TierLimits,
    pub used: u64,
    pub remaining: u64,
    pub cycle_start: DateTime<Utc>,
    pub next_reset: DateTime<Utc>,
}

impl QuotaDecision {
    /// Remaining calls once the current request has been charged.
    pub fn remaining_after_charge(&self) -> u64 {
        self.limits
            .monthly_quota
            .saturating_sub(self.used)
            .saturating_sub(1)
    }

    /// Timestamp for the ledger entry of a call admitted at `now`.
    ///
    /// A concurrent request may have moved the anchor past `now`; the entry
    /// must still fall inside the cycle it was admitted against.
    pub fn charge_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.max(self.cycle_start)
    }

    pub fn into_result(self) -> Result<QuotaDecision> {
        if self.allowed {
            Ok(self)
        } else {
            Err(UsageError::QuotaExceeded {
                tier: self.tier,
                next_reset: self.next_reset,
            })
        }
    }
}

pub struct UsageTracker {
    storage: Arc<dyn UsageStorage>,
    policy: CyclePolicy,
}

impl UsageTracker {
    pub fn new(storage: Arc<dyn UsageStorage>) -> Self {
        Self::with_policy(storage, CyclePolicy::default())
    }

    pub fn with_policy(storage: Arc<dyn UsageStorage>, policy: CyclePolicy) -> Self {
        Self { storage, policy }
    }

    /// Loads the actor and works out its current billing cycle, moving the
    /// stored anchor forward once if the previous cycle has run out.
    pub async fn resolve_cycle(
        &self,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Actor, BillingCycle)> {
        let mut actor = self.storage.get_actor(actor_id).await?;
        let anchor = actor.cycle_anchor();
        let cycle = self.policy.resolve(anchor, now);

        if !cycle.elapsed {
            return Ok((actor, cycle));
        }

        if self.storage.advance_anchor(actor_id, anchor, now).await? {
            info!(actor_id, previous = %anchor, "Billing cycle elapsed, anchor advanced");
            actor.subscription_anchor = Some(now);
            return Ok((actor, cycle));
        }

        // Lost the race: someone else already moved the anchor.
        debug!(actor_id, "Anchor advanced concurrently, re-reading actor");
        let actor = self.storage.get_actor(actor_id).await?;
        let cycle = self.policy.resolve(actor.cycle_anchor(), now);
        Ok((actor, cycle))
    }

    /// Read-only quota check against the ledger entries of the given cycle.
    pub async fn check_quota(&self, actor: &Actor, cycle: &BillingCycle) -> Result<QuotaDecision> {
        let limits = actor.tier.limits();
        let used = self
            .storage
            .count_entries_since(&actor.id, cycle.start)
            .await?;

        Ok(QuotaDecision {
            allowed: used < limits.monthly_quota,
            tier: actor.tier,
            remaining: limits.monthly_quota.saturating_sub(used),
            limits,
            used,
            cycle_start: cycle.start,
            next_reset: cycle.next_reset,
        })
    }

    /// Cycle resolution followed by the quota check.
    pub async fn gate(&self, actor_id: &str, now: DateTime<Utc>) -> Result<QuotaDecision> {
        let (actor, cycle) = self.resolve_cycle(actor_id, now).await?;
        self.check_quota(&actor, &cycle).await
    }

    pub async fn record_call(
        &self,
        actor_id: &str,
        kind: CallKind,
        cost: u64,
        endpoint: &str,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        let entry = LedgerEntry::charge(actor_id, kind, cost, endpoint, now);
        self.storage.append_entry(&entry).await?;
        Ok(entry)
    }
}
