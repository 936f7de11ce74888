use crate::auth::authenticate;
use crate::error::{ApiError, Result};
use crate::AppState;
use axum::{body::Bytes, extract::State, http::HeaderMap, response::IntoResponse, Json};
use chrono::{SecondsFormat, Utc};
use mogulate_billing::{ActorRef, WebhookOutcome};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, instrument};

const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Serialize)]
pub struct SubscriptionStatus {
    pub subscribed: bool,
    pub subscription_tier: String,
    pub subscription_end: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub tier: String,
    pub used: u64,
    pub limit: u64,
    pub remaining: u64,
    pub next_reset: String,
}

/// On-demand reconciliation against the payments provider.
#[instrument(skip(state, headers))]
pub async fn check_subscription(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SubscriptionStatus>> {
    let identity = authenticate(&headers, &state).await?;
    let result = state
        .reconciler
        .reconcile(ActorRef::Id(&identity.id), Utc::now())
        .await?;

    Ok(Json(SubscriptionStatus {
        subscribed: result.subscribed,
        subscription_tier: result.tier.to_string(),
        subscription_end: result
            .period_end
            .map(|end| end.to_rfc3339_opts(SecondsFormat::Secs, true)),
    }))
}

#[instrument(skip(state, headers))]
pub async fn usage_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UsageSummary>> {
    let identity = authenticate(&headers, &state).await?;
    let decision = state.tracker.gate(&identity.id, Utc::now()).await?;

    Ok(Json(UsageSummary {
        tier: decision.tier.to_string(),
        used: decision.used,
        limit: decision.limits.monthly_quota,
        remaining: decision.remaining,
        next_reset: decision.next_reset.format("%Y-%m-%d").to_string(),
    }))
}

/// Acknowledges every correctly signed event, whatever reconciliation made
/// of it, so the provider does not redeliver.
#[instrument(skip(state, headers, body))]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    let verifier = state
        .webhook_verifier
        .as_ref()
        .ok_or_else(|| ApiError::Internal("Webhook secret not configured".to_string()))?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidSignature("Missing signature header".to_string()))?;

    let now = Utc::now();
    let event = verifier.verify(&body, signature, now)?;

    match state.reconciler.handle_webhook(&event, now).await {
        Ok(WebhookOutcome::Reconciled(result)) => info!(
            event_type = %event.event_type,
            user_id = %result.actor_id,
            tier = %result.tier,
            changed = result.changed,
            "Webhook reconciled"
        ),
        Ok(WebhookOutcome::Ignored) => info!(event_type = %event.event_type, "Webhook ignored"),
        Ok(WebhookOutcome::Unmatched) => {
            info!(event_type = %event.event_type, "Webhook matched no user")
        }
        Err(e) => error!(event_type = %event.event_type, error = %e, "Webhook reconciliation failed"),
    }

    Ok(Json(json!({ "received": true })))
}

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "mogulate-server",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
