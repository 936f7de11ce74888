//! Per-project result storage. Each generation step writes one column of the
//! project row, upserted by project id.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

const PROJECTS: &str = "projects";

#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("Project {0} belongs to another user")]
    NotOwned(String),
    #[error("Project storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectField {
    Competitors,
    MarketGapAnalysis,
    Features,
    ValidationPlan,
}

impl ProjectField {
    pub fn column(&self) -> &'static str {
        match self {
            ProjectField::Competitors => "competitors",
            ProjectField::MarketGapAnalysis => "market_gap_analysis",
            ProjectField::Features => "features",
            ProjectField::ValidationPlan => "validation_plan",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub user_id: String,
    #[serde(flatten)]
    pub results: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn save(
        &self,
        user_id: &str,
        project_id: &str,
        field: ProjectField,
        value: Value,
        now: DateTime<Utc>,
    ) -> Result<(), ProjectError>;
}

#[derive(Default)]
pub struct InMemoryProjects {
    projects: Arc<RwLock<HashMap<String, Project>>>,
}

impl InMemoryProjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, project_id: &str) -> Option<Project> {
        self.projects.read().await.get(project_id).cloned()
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjects {
    async fn save(
        &self,
        user_id: &str,
        project_id: &str,
        field: ProjectField,
        value: Value,
        now: DateTime<Utc>,
    ) -> Result<(), ProjectError> {
        let mut projects = self.projects.write().await;
        let project = projects
            .entry(project_id.to_string())
            .or_insert_with(|| Project {
                id: project_id.to_string(),
                user_id: user_id.to_string(),
                results: Map::new(),
                updated_at: now,
            });
        if project.user_id != user_id {
            return Err(ProjectError::NotOwned(project_id.to_string()));
        }
        project.results.insert(field.column().to_string(), value);
        project.updated_at = now;
        Ok(())
    }
}

/// `projects` table through the hosted database's PostgREST interface.
pub struct PostgrestProjects {
    client: Client,
    base_url: String,
    service_key: String,
}

#[derive(Deserialize)]
struct OwnerRow {
    user_id: String,
}

impl PostgrestProjects {
    pub fn new(base_url: &str, service_key: &str, timeout: Duration) -> Result<Self, ProjectError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProjectError::Storage(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        })
    }

    fn url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, PROJECTS)
    }

    async fn owner(&self, project_id: &str) -> Result<Option<String>, ProjectError> {
        let id_filter = format!("eq.{project_id}");
        let response = self
            .client
            .get(self.url())
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .query(&[("select", "user_id"), ("id", id_filter.as_str())])
            .send()
            .await
            .map_err(|e| ProjectError::Storage(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProjectError::Storage(format!(
                "Project lookup returned {}",
                response.status()
            )));
        }
        let rows: Vec<OwnerRow> = response
            .json()
            .await
            .map_err(|e| ProjectError::Storage(e.to_string()))?;
        Ok(rows.into_iter().next().map(|row| row.user_id))
    }
}

#[async_trait]
impl ProjectStore for PostgrestProjects {
    async fn save(
        &self,
        user_id: &str,
        project_id: &str,
        field: ProjectField,
        value: Value,
        now: DateTime<Utc>,
    ) -> Result<(), ProjectError> {
        if let Some(owner) = self.owner(project_id).await? {
            if owner != user_id {
                return Err(ProjectError::NotOwned(project_id.to_string()));
            }
        }

        let mut row = Map::new();
        row.insert("id".to_string(), Value::String(project_id.to_string()));
        row.insert("user_id".to_string(), Value::String(user_id.to_string()));
        row.insert(field.column().to_string(), value);
        row.insert(
            "updated_at".to_string(),
            Value::String(now.to_rfc3339_opts(SecondsFormat::Micros, true)),
        );

        let response = self
            .client
            .post(self.url())
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .query(&[("on_conflict", "id")])
            .json(&Value::Object(row))
            .send()
            .await
            .map_err(|e| ProjectError::Storage(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProjectError::Storage(format!("Upsert returned {status}: {body}")));
        }
        debug!(project_id, column = field.column(), "Project updated");
        Ok(())
    }
}
