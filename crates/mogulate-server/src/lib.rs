//! HTTP surface of the Mogulate wizard backend.

pub mod auth;
pub mod config;
pub mod error;
pub mod generation;
pub mod handlers;
pub mod projects;
pub mod shaping;

use axum::{
    routing::{get, post},
    Router,
};
use mogulate_ai::Generator;
use mogulate_billing::{Reconciler, WebhookVerifier};
use mogulate_usage::UsageTracker;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use auth::{Identity, IdentityProvider, StaticTokens, SupabaseAuth};
pub use config::ServerConfig;
pub use error::ApiError;
pub use projects::{InMemoryProjects, PostgrestProjects, ProjectStore};

#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<UsageTracker>,
    pub reconciler: Arc<Reconciler>,
    /// `None` when no webhook secret is configured; the webhook route then
    /// refuses every delivery.
    pub webhook_verifier: Option<Arc<WebhookVerifier>>,
    pub identity: Arc<dyn IdentityProvider>,
    /// Web-search-grounded generator, used for competitor discovery.
    pub search: Arc<dyn Generator>,
    /// Chat-completion generator for everything else.
    pub chat: Arc<dyn Generator>,
    pub projects: Arc<dyn ProjectStore>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/competitors", post(generation::competitors_handler))
        .route("/api/v1/market-gaps", post(generation::market_gaps_handler))
        .route("/api/v1/features", post(generation::features_handler))
        .route(
            "/api/v1/validation-plan",
            post(generation::validation_plan_handler),
        )
        .route(
            "/api/v1/subscription/check",
            get(handlers::check_subscription).post(handlers::check_subscription),
        )
        .route("/api/v1/usage", get(handlers::usage_summary))
        .route("/api/v1/webhooks/stripe", post(handlers::stripe_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests;
