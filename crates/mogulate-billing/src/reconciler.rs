use crate::{BillingError, PaymentsProvider, PriceCatalog, Result, WebhookEvent};
use chrono::{DateTime, Utc};
use mogulate_usage::{Actor, CallKind, LedgerEntry, Tier, UsageStorage};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const WEBHOOK_ENDPOINT: &str = "stripe-webhook";

#[derive(Debug, Clone, Copy)]
pub enum ActorRef<'a> {
    Id(&'a str),
    Email(&'a str),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reconciliation {
    pub actor_id: String,
    pub subscribed: bool,
    pub tier: Tier,
    pub period_end: Option<DateTime<Utc>>,
    /// Whether the stored tier was rewritten.
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Reconciled(Reconciliation),
    /// Event type that cannot change subscription state.
    Ignored,
    /// No actor could be matched to the event.
    Unmatched,
}

/// Maps payments-provider state onto the actor's stored tier.
///
/// This is the only writer of the tier field.
pub struct Reconciler {
    payments: Arc<dyn PaymentsProvider>,
    storage: Arc<dyn UsageStorage>,
    prices: PriceCatalog,
}

impl Reconciler {
    pub fn new(
        payments: Arc<dyn PaymentsProvider>,
        storage: Arc<dyn UsageStorage>,
        prices: PriceCatalog,
    ) -> Self {
        Self {
            payments,
            storage,
            prices,
        }
    }

    async fn load_actor(&self, actor: ActorRef<'_>) -> Result<Actor> {
        match actor {
            ActorRef::Id(id) => Ok(self.storage.get_actor(id).await?),
            ActorRef::Email(email) => self
                .storage
                .find_actor_by_email(email)
                .await?
                .ok_or_else(|| BillingError::ActorNotFound(email.to_string())),
        }
    }

    /// Every provider lookup happens before any write, so a provider failure
    /// leaves the last known tier in place.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, actor: ActorRef<'_>, now: DateTime<Utc>) -> Result<Reconciliation> {
        let actor = self.load_actor(actor).await?;

        let subscription = match self.payments.find_customer_by_email(&actor.email).await? {
            Some(customer) => self.payments.active_subscription(&customer.id).await?,
            None => None,
        };

        let target = subscription
            .as_ref()
            .map(|sub| self.prices.tier_for(sub.price_id.as_deref(), sub.unit_amount))
            .unwrap_or(Tier::Free);

        let changed = target != actor.tier;
        if changed {
            self.storage.set_subscription(&actor.id, target, now).await?;
            info!(actor_id = %actor.id, from = %actor.tier, to = %target, "Subscription tier updated");
        }

        Ok(Reconciliation {
            actor_id: actor.id,
            subscribed: subscription.is_some(),
            tier: target,
            period_end: subscription.and_then(|sub| sub.current_period_end),
            changed,
        })
    }

    /// Reconciles the actor an already verified webhook event refers to,
    /// then appends an audit row for the event.
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn handle_webhook(&self, event: &WebhookEvent, now: DateTime<Utc>) -> Result<WebhookOutcome> {
        let outcome = self.reconcile_event(event, now).await;
        self.audit(event, now).await;
        outcome
    }

    async fn reconcile_event(&self, event: &WebhookEvent, now: DateTime<Utc>) -> Result<WebhookOutcome> {
        if !event.affects_subscription() {
            return Ok(WebhookOutcome::Ignored);
        }

        let email = match event.email() {
            Some(email) => Some(email.to_string()),
            None => match event.customer_id() {
                Some(customer_id) => self
                    .payments
                    .get_customer(customer_id)
                    .await?
                    .and_then(|c| c.email),
                None => None,
            },
        };

        let Some(email) = email else {
            warn!("Webhook event carries no customer email");
            return Ok(WebhookOutcome::Unmatched);
        };

        match self.reconcile(ActorRef::Email(&email), now).await {
            Ok(result) => Ok(WebhookOutcome::Reconciled(result)),
            Err(BillingError::ActorNotFound(_)) => {
                warn!("No actor registered for webhook customer");
                Ok(WebhookOutcome::Unmatched)
            }
            Err(e) => Err(e),
        }
    }

    async fn audit(&self, event: &WebhookEvent, now: DateTime<Utc>) {
        let entry = LedgerEntry::audit(
            CallKind::StripeWebhook,
            WEBHOOK_ENDPOINT,
            event.event_type.clone(),
            now,
        );
        if let Err(e) = self.storage.append_entry(&entry).await {
            warn!(error = %e, "Failed to write webhook audit row");
        }
    }
}
