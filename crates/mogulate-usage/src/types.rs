use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Profile row for an authenticated user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Actor {
    pub id: String,
    pub email: String,
    pub tier: crate::Tier,
    // Set by the reconciler when the tier changes and by the cycle resolver
    // when a cycle has elapsed.
    pub subscription_anchor: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Actor {
    pub fn cycle_anchor(&self) -> DateTime<Utc> {
        self.subscription_anchor.unwrap_or(self.created_at)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Perplexity,
    #[serde(rename = "openai")]
    OpenAi,
    StripeWebhook,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Perplexity => "perplexity",
            CallKind::OpenAi => "openai",
            CallKind::StripeWebhook => "stripe_webhook",
        }
    }
}

/// One append-only usage ledger row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub id: String,
    pub actor_id: Option<String>,
    pub kind: CallKind,
    pub cost: u64,
    pub endpoint: String,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// A metered call made on behalf of an actor.
    pub fn charge(
        actor_id: &str,
        kind: CallKind,
        cost: u64,
        endpoint: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            actor_id: Some(actor_id.to_string()),
            kind,
            cost,
            endpoint: endpoint.to_string(),
            detail: None,
            created_at,
        }
    }

    /// A zero-cost system row with no actor. Never counted against a quota.
    pub fn audit(
        kind: CallKind,
        endpoint: &str,
        detail: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            actor_id: None,
            kind,
            cost: 0,
            endpoint: endpoint.to_string(),
            detail: Some(detail.into()),
            created_at,
        }
    }
}
