use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use mogulate_ai::GenerationError;
use mogulate_billing::BillingError;
use mogulate_common::CommonError;
use mogulate_usage::{Tier, UsageError};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Unauthenticated(&'static str),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("User profile not found: {0}")]
    ActorNotFound(String),
    #[error("Monthly usage limit reached for the {tier} plan")]
    QuotaExceeded {
        tier: Tier,
        next_reset: DateTime<Utc>,
    },
    #[error("Upstream service failed: {0}")]
    UpstreamFailure(String),
    #[error("Could not understand the generated response: {0}")]
    MalformedUpstreamResponse(String),
    /// The result was generated and charged but could not be saved. The
    /// response still carries it so the caller need not pay twice.
    #[error("Failed to save results: {message}")]
    PersistenceFailure {
        message: String,
        data: Map<String, Value>,
    },
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) | ApiError::InvalidSignature(_) => StatusCode::BAD_REQUEST,
            ApiError::QuotaExceeded { .. } => StatusCode::FORBIDDEN,
            ApiError::ActorNotFound(_)
            | ApiError::UpstreamFailure(_)
            | ApiError::MalformedUpstreamResponse(_)
            | ApiError::PersistenceFailure { .. }
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<UsageError> for ApiError {
    fn from(err: UsageError) -> Self {
        match err {
            UsageError::ActorNotFound(id) => ApiError::ActorNotFound(id),
            UsageError::QuotaExceeded { tier, next_reset } => {
                ApiError::QuotaExceeded { tier, next_reset }
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Malformed(msg) => ApiError::MalformedUpstreamResponse(msg),
            other => ApiError::UpstreamFailure(other.to_string()),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Provider(msg) => ApiError::UpstreamFailure(msg),
            BillingError::InvalidSignature(msg) => ApiError::InvalidSignature(msg),
            BillingError::InvalidPayload(msg) => ApiError::BadRequest(msg),
            BillingError::ActorNotFound(id) => ApiError::ActorNotFound(id),
            BillingError::Storage(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<CommonError> for ApiError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::InvalidInput(msg) => ApiError::BadRequest(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }

        let message = self.to_string();
        let body = match self {
            ApiError::QuotaExceeded { tier, next_reset } => json!({
                "success": false,
                "error": message,
                "tier": tier,
                "remainingUsage": 0,
                "nextReset": next_reset.format("%Y-%m-%d").to_string(),
            }),
            ApiError::PersistenceFailure { mut data, .. } => {
                data.insert("success".to_string(), Value::Bool(false));
                data.insert("error".to_string(), Value::String(message));
                Value::Object(data)
            }
            _ => json!({
                "success": false,
                "error": message,
            }),
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
