//! Deterministic prompt builders. The same inputs always produce the same
//! prompt, field order included.

use crate::Prompt;
use mogulate_common::{CompetitorRecord, FeatureRecord};
use std::fmt::Write;

const JSON_ONLY: &str = "Respond with a single JSON object and nothing else. \
Do not wrap it in markdown.";

fn system(role: &str) -> String {
    format!("{role} {JSON_ONLY}")
}

pub fn competitors(idea: &str, count: usize) -> Prompt {
    Prompt {
        system: system(
            "You are a market research analyst with live web search. \
             Only list companies and products that actually exist.",
        ),
        user: format!(
            "Business idea: {idea}\n\n\
             Find the {count} most relevant existing competitors.\n\
             Return {{\"competitors\": [{{\"name\": string, \"description\": string, \
             \"website\": string}}]}}."
        ),
        temperature: 0.2,
        max_tokens: Some(1500),
    }
}

pub fn market_gaps(
    idea: &str,
    competitors: &[CompetitorRecord],
    gap_count: usize,
    positioning_count: usize,
) -> Prompt {
    let mut listing = String::new();
    for (i, competitor) in competitors.iter().enumerate() {
        let _ = write!(listing, "{}. {}", i + 1, competitor.name);
        if let Some(description) = &competitor.description {
            let _ = write!(listing, ": {description}");
        }
        listing.push('\n');
    }

    Prompt {
        system: system("You are a startup strategist who finds underserved market segments."),
        user: format!(
            "Business idea: {idea}\n\nKnown competitors:\n{listing}\n\
             Identify {gap_count} market gaps these competitors leave open and \
             {positioning_count} positioning statements that exploit them.\n\
             Return {{\"summary\": string, \"gaps\": [{{\"title\": string, \"description\": string}}], \
             \"positioningSuggestions\": [{{\"statement\": string, \"rationale\": string}}]}}."
        ),
        temperature: 0.6,
        max_tokens: Some(2000),
    }
}

pub fn features(idea: &str, positioning: &str, count: usize) -> Prompt {
    Prompt {
        system: system("You are a product manager planning a minimum viable product."),
        user: format!(
            "Business idea: {idea}\nChosen positioning: {positioning}\n\n\
             Propose up to {count} features, most important first.\n\
             Return {{\"features\": [{{\"name\": string, \"description\": string, \
             \"priority\": \"must-have\" | \"should-have\" | \"nice-to-have\"}}]}}."
        ),
        temperature: 0.5,
        max_tokens: Some(2000),
    }
}

pub fn validation_plan(idea: &str, features: &[FeatureRecord]) -> Prompt {
    let listing = features
        .iter()
        .map(|f| format!("- {}: {}", f.name, f.description))
        .collect::<Vec<_>>()
        .join("\n");

    Prompt {
        system: system("You are a lean-startup coach designing cheap validation experiments."),
        user: format!(
            "Business idea: {idea}\n\nPlanned features:\n{listing}\n\n\
             Design a validation plan.\n\
             Return {{\"summary\": string, \"experiments\": [{{\"name\": string, \
             \"hypothesis\": string, \"method\": string, \"metric\": string}}], \
             \"successCriteria\": [string]}}."
        ),
        temperature: 0.5,
        max_tokens: Some(2500),
    }
}
