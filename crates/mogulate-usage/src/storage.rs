use crate::{Actor, LedgerEntry, Result, Tier, UsageError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Actor profiles plus the append-only usage ledger.
#[async_trait]
pub trait UsageStorage: Send + Sync {
    async fn get_actor(&self, actor_id: &str) -> Result<Actor>;
    async fn find_actor_by_email(&self, email: &str) -> Result<Option<Actor>>;
    /// Writes tier and cycle anchor together.
    async fn set_subscription(
        &self,
        actor_id: &str,
        tier: Tier,
        anchor: DateTime<Utc>,
    ) -> Result<()>;
    /// Moves the cycle anchor only if it still equals `expected`. Returns
    /// false when another writer got there first.
    async fn advance_anchor(
        &self,
        actor_id: &str,
        expected: DateTime<Utc>,
        anchor: DateTime<Utc>,
    ) -> Result<bool>;
    async fn append_entry(&self, entry: &LedgerEntry) -> Result<()>;
    async fn count_entries_since(&self, actor_id: &str, since: DateTime<Utc>) -> Result<u64>;
}

// In-memory storage implementation for development/testing
#[derive(Default)]
pub struct InMemoryStorage {
    actors: Arc<RwLock<HashMap<String, Actor>>>,
    ledger: Arc<RwLock<Vec<LedgerEntry>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_actor(
        &self,
        actor_id: &str,
        email: &str,
        tier: Tier,
        created_at: DateTime<Utc>,
    ) -> Actor {
        let actor = Actor {
            id: actor_id.to_string(),
            email: email.to_string(),
            tier,
            subscription_anchor: None,
            created_at,
        };
        self.actors
            .write()
            .await
            .insert(actor.id.clone(), actor.clone());
        actor
    }

    pub async fn entries(&self) -> Vec<LedgerEntry> {
        self.ledger.read().await.clone()
    }

    pub async fn entries_for(&self, actor_id: &str) -> Vec<LedgerEntry> {
        self.ledger
            .read()
            .await
            .iter()
            .filter(|e| e.actor_id.as_deref() == Some(actor_id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl UsageStorage for InMemoryStorage {
    async fn get_actor(&self, actor_id: &str) -> Result<Actor> {
        self.actors
            .read()
            .await
            .get(actor_id)
            .cloned()
            .ok_or_else(|| UsageError::ActorNotFound(actor_id.to_string()))
    }

    async fn find_actor_by_email(&self, email: &str) -> Result<Option<Actor>> {
        Ok(self
            .actors
            .read()
            .await
            .values()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn set_subscription(
        &self,
        actor_id: &str,
        tier: Tier,
        anchor: DateTime<Utc>,
    ) -> Result<()> {
        let mut actors = self.actors.write().await;
        let actor = actors
            .get_mut(actor_id)
            .ok_or_else(|| UsageError::ActorNotFound(actor_id.to_string()))?;
        actor.tier = tier;
        actor.subscription_anchor = Some(anchor);
        Ok(())
    }

    async fn advance_anchor(
        &self,
        actor_id: &str,
        expected: DateTime<Utc>,
        anchor: DateTime<Utc>,
    ) -> Result<bool> {
        let mut actors = self.actors.write().await;
        let actor = actors
            .get_mut(actor_id)
            .ok_or_else(|| UsageError::ActorNotFound(actor_id.to_string()))?;
        if actor.cycle_anchor() != expected {
            return Ok(false);
        }
        actor.subscription_anchor = Some(anchor);
        Ok(true)
    }

    async fn append_entry(&self, entry: &LedgerEntry) -> Result<()> {
        self.ledger.write().await.push(entry.clone());
        Ok(())
    }

    async fn count_entries_since(&self, actor_id: &str, since: DateTime<Utc>) -> Result<u64> {
        let count = self
            .ledger
            .read()
            .await
            .iter()
            .filter(|e| e.actor_id.as_deref() == Some(actor_id) && e.created_at >= since)
            .count();
        Ok(count as u64)
    }
}
