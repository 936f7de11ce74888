// Payments-provider integration: subscription lookups, webhook verification
// and reconciliation of the actor's stored tier.
use thiserror::Error;

mod pricing;
mod reconciler;
mod stripe;
mod webhook;

pub use pricing::PriceCatalog;
pub use reconciler::{ActorRef, Reconciler, Reconciliation, WebhookOutcome};
pub use stripe::{ActiveSubscription, Customer, PaymentsProvider, StripeClient};
pub use webhook::{WebhookEvent, WebhookVerifier, SIGNATURE_TOLERANCE_SECS};

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("Payments provider error: {0}")]
    Provider(String),
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),
    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),
    #[error("Actor not found: {0}")]
    ActorNotFound(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<mogulate_usage::UsageError> for BillingError {
    fn from(err: mogulate_usage::UsageError) -> Self {
        match err {
            mogulate_usage::UsageError::ActorNotFound(id) => BillingError::ActorNotFound(id),
            other => BillingError::Storage(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BillingError>;
