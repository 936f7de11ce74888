// Shared wizard records passed between the generators, the shaping layer and
// project persistence.

use std::fmt::Display;

pub use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CommonError>;

/// Where a list item came from.
///
/// Placeholder backfill is never blended with generated data: anything the
/// shaping layer invents to meet a tier's promised count is `Synthetic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    #[default]
    Generated,
    Synthetic,
    UserAuthored,
}

impl Provenance {
    pub fn is_synthetic(&self) -> bool {
        matches!(self, Provenance::Synthetic)
    }
}

impl Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Provenance::Generated => "generated",
            Provenance::Synthetic => "synthetic",
            Provenance::UserAuthored => "user_authored",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitorRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default)]
    pub provenance: Provenance,
}

impl CompetitorRecord {
    pub fn placeholder(index: usize) -> Self {
        Self {
            name: format!("Additional competitor {index}"),
            description: Some(
                "Placeholder entry: no further competitors were found for this idea.".to_string(),
            ),
            website: None,
            provenance: Provenance::Synthetic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketGap {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub provenance: Provenance,
}

impl MarketGap {
    pub fn placeholder(index: usize) -> Self {
        Self {
            title: format!("Unexplored opportunity {index}"),
            description: "Placeholder entry: the analysis did not surface another gap."
                .to_string(),
            provenance: Provenance::Synthetic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositioningSuggestion {
    pub statement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default)]
    pub provenance: Provenance,
}

impl PositioningSuggestion {
    pub fn placeholder(index: usize) -> Self {
        Self {
            statement: format!("Alternative positioning {index}"),
            rationale: Some("Placeholder entry: no further positioning was suggested.".to_string()),
            provenance: Provenance::Synthetic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketGapAnalysis {
    #[serde(default)]
    pub gaps: Vec<MarketGap>,
    #[serde(default)]
    pub positioning_suggestions: Vec<PositioningSuggestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRecord {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default)]
    pub provenance: Provenance,
}

impl FeatureRecord {
    pub fn placeholder(index: usize) -> Self {
        Self {
            name: format!("Open feature slot {index}"),
            description: "Placeholder entry: fewer features were proposed than this plan allows."
                .to_string(),
            priority: None,
            provenance: Provenance::Synthetic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationExperiment {
    pub name: String,
    #[serde(default)]
    pub hypothesis: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub metric: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationPlan {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub experiments: Vec<ValidationExperiment>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

/// Rejects blank free-text input before anything is spent on it.
pub fn require_text<'a>(field: &str, value: Option<&'a str>) -> Result<&'a str> {
    match value.map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(CommonError::InvalidInput(format!("{field} is required"))),
    }
}
