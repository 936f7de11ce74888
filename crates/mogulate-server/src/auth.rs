use crate::error::ApiError;
use crate::AppState;
use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Auth provider error: {0}")]
    Provider(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Resolves a bearer token to the user it was issued for.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Hosted auth: `GET {url}/auth/v1/user` with the caller's token.
pub struct SupabaseAuth {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseAuth {
    pub fn new(base_url: &str, anon_key: &str, timeout: Duration) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Provider(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        })
    }
}

#[async_trait]
impl IdentityProvider for SupabaseAuth {
    async fn resolve(&self, token: &str) -> Result<Identity, AuthError> {
        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json()
                .await
                .map_err(|e| AuthError::Provider(format!("Invalid user payload: {e}"))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AuthError::InvalidToken),
            status => Err(AuthError::Provider(format!("Auth returned {status}"))),
        }
    }
}

/// Fixed token table for local development and tests.
#[derive(Default)]
pub struct StaticTokens {
    tokens: HashMap<String, Identity>,
}

impl StaticTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: &str, user_id: &str, email: &str) -> Self {
        self.tokens.insert(
            token.to_string(),
            Identity {
                id: user_id.to_string(),
                email: Some(email.to_string()),
            },
        );
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticTokens {
    async fn resolve(&self, token: &str) -> Result<Identity, AuthError> {
        self.tokens.get(token).cloned().ok_or(AuthError::InvalidToken)
    }
}

pub(crate) async fn authenticate(headers: &HeaderMap, state: &AppState) -> Result<Identity, ApiError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::Unauthenticated("Authorization header required"))?;

    match state.identity.resolve(token).await {
        Ok(identity) => {
            debug!(user_id = %identity.id, "Request authenticated");
            Ok(identity)
        }
        Err(AuthError::InvalidToken) => Err(ApiError::Unauthenticated("Authentication required")),
        Err(AuthError::Provider(msg)) => Err(ApiError::UpstreamFailure(msg)),
    }
}
