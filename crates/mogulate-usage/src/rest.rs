//! Usage storage backed by the hosted database's PostgREST interface.
//!
//! Tables: `profiles` (one row per actor) and `api_usage_logs` (the ledger).

use crate::{Actor, LedgerEntry, Result, Tier, UsageError, UsageStorage};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const PROFILES: &str = "profiles";
const USAGE_LOGS: &str = "api_usage_logs";

pub struct PostgrestStorage {
    client: Client,
    base_url: String,
    service_key: String,
}

#[derive(Debug, Deserialize)]
struct ProfileRow {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    subscription_tier: Option<String>,
    #[serde(default)]
    subscription_start_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<ProfileRow> for Actor {
    fn from(row: ProfileRow) -> Self {
        Actor {
            id: row.id,
            email: row.email.unwrap_or_default(),
            tier: row
                .subscription_tier
                .as_deref()
                .map(Tier::from_label)
                .unwrap_or_default(),
            subscription_anchor: row.subscription_start_date,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct UsageLogRow<'a> {
    id: &'a str,
    user_id: Option<&'a str>,
    api_type: &'a str,
    tokens_used: u64,
    endpoint: &'a str,
    details: Option<&'a str>,
    created_at: String,
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl PostgrestStorage {
    /// `base_url` is the project URL, e.g. `https://xyz.supabase.co`.
    pub fn new(base_url: &str, service_key: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UsageError::Storage(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        })
    }

    fn table(&self, method: reqwest::Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/rest/v1/{}", self.base_url, table))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn send(request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| UsageError::Storage(format!("Database request failed: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(UsageError::Storage(format!("Database returned {status}: {body}")));
        }
        Ok(response)
    }

    async fn profiles(request: RequestBuilder) -> Result<Vec<ProfileRow>> {
        Self::send(request)
            .await?
            .json()
            .await
            .map_err(|e| UsageError::Storage(format!("Invalid profile payload: {e}")))
    }
}

/// Escapes the `ilike` wildcards so an address only ever matches itself,
/// case-insensitively.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl UsageStorage for PostgrestStorage {
    async fn get_actor(&self, actor_id: &str) -> Result<Actor> {
        let id_filter = format!("eq.{actor_id}");
        let rows = Self::profiles(
            self.table(reqwest::Method::GET, PROFILES)
                .query(&[("select", "*"), ("id", id_filter.as_str())]),
        )
        .await?;
        rows.into_iter()
            .next()
            .map(Actor::from)
            .ok_or_else(|| UsageError::ActorNotFound(actor_id.to_string()))
    }

    async fn find_actor_by_email(&self, email: &str) -> Result<Option<Actor>> {
        let email_filter = format!("ilike.{}", escape_like(email));
        let rows = Self::profiles(
            self.table(reqwest::Method::GET, PROFILES).query(&[
                ("select", "*"),
                ("email", email_filter.as_str()),
                ("limit", "1"),
            ]),
        )
        .await?;
        Ok(rows.into_iter().next().map(Actor::from))
    }

    async fn set_subscription(
        &self,
        actor_id: &str,
        tier: Tier,
        anchor: DateTime<Utc>,
    ) -> Result<()> {
        let body = serde_json::json!({
            "subscription_tier": tier.as_str(),
            "subscription_start_date": timestamp(anchor),
        });
        Self::send(
            self.table(reqwest::Method::PATCH, PROFILES)
                .query(&[("id", format!("eq.{actor_id}"))])
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn advance_anchor(
        &self,
        actor_id: &str,
        expected: DateTime<Utc>,
        anchor: DateTime<Utc>,
    ) -> Result<bool> {
        let current = self.get_actor(actor_id).await?;
        if current.cycle_anchor() != expected {
            return Ok(false);
        }
        let guard = match current.subscription_anchor {
            Some(at) => format!("eq.{}", timestamp(at)),
            None => "is.null".to_string(),
        };

        let rows = Self::profiles(
            self.table(reqwest::Method::PATCH, PROFILES)
                .query(&[
                    ("id", format!("eq.{actor_id}")),
                    ("subscription_start_date", guard),
                ])
                .header("Prefer", "return=representation")
                .json(&serde_json::json!({ "subscription_start_date": timestamp(anchor) })),
        )
        .await?;
        // No row back means the guard no longer matched.
        Ok(!rows.is_empty())
    }

    async fn append_entry(&self, entry: &LedgerEntry) -> Result<()> {
        let row = UsageLogRow {
            id: &entry.id,
            user_id: entry.actor_id.as_deref(),
            api_type: entry.kind.as_str(),
            tokens_used: entry.cost,
            endpoint: &entry.endpoint,
            details: entry.detail.as_deref(),
            created_at: timestamp(entry.created_at),
        };
        Self::send(
            self.table(reqwest::Method::POST, USAGE_LOGS)
                .header("Prefer", "return=minimal")
                .json(&row),
        )
        .await?;
        Ok(())
    }

    async fn count_entries_since(&self, actor_id: &str, since: DateTime<Utc>) -> Result<u64> {
        let response = Self::send(
            self.table(reqwest::Method::GET, USAGE_LOGS)
                .query(&[
                    ("select", "id".to_string()),
                    ("user_id", format!("eq.{actor_id}")),
                    ("created_at", format!("gte.{}", timestamp(since))),
                    ("limit", "1".to_string()),
                ])
                .header("Prefer", "count=exact"),
        )
        .await?;

        // Content-Range: 0-0/17 (or */0 when empty)
        response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(|range| range.rsplit('/').next())
            .and_then(|total| total.parse::<u64>().ok())
            .ok_or_else(|| UsageError::Storage("Missing usage count in response".to_string()))
    }
}
