//! Lenient decoding of generator output into wizard records.
//!
//! Models wrap JSON in prose or markdown fences often enough that the first
//! balanced JSON value in the text that decodes as the expected shape is taken
//! as the payload.

use crate::{GenerationError, Result};
use mogulate_common::{
    CompetitorRecord, FeatureRecord, MarketGap, MarketGapAnalysis, PositioningSuggestion,
    Provenance, ValidationPlan,
};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Byte span of the balanced object or array opening at `start`, if it closes.
fn balanced_span(content: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in content[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&content[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Every complete JSON object or array embedded in `content`, in order.
fn json_values(content: &str) -> impl Iterator<Item = Value> + '_ {
    let mut from = 0;
    std::iter::from_fn(move || {
        while let Some(pos) = content[from..].find(['{', '[']) {
            let start = from + pos;
            if let Some(span) = balanced_span(content, start) {
                if let Ok(value) = serde_json::from_str(span) {
                    from = start + span.len();
                    return Some(value);
                }
            }
            from = start + 1;
        }
        None
    })
}

/// Returns the first complete JSON object or array embedded in `content`.
pub fn extract_json(content: &str) -> Result<Value> {
    json_values(content)
        .next()
        .ok_or_else(|| GenerationError::Malformed("No JSON found in output".to_string()))
}

/// Decodes the first embedded JSON value that `decode` accepts. Citation
/// markers such as `[1]` in leading prose are skipped this way.
fn first_decoded<T>(content: &str, decode: impl Fn(Value) -> Result<T>) -> Result<T> {
    let mut last_err = None;
    for value in json_values(content) {
        match decode(value) {
            Ok(decoded) => return Ok(decoded),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err
        .unwrap_or_else(|| GenerationError::Malformed("No JSON found in output".to_string())))
}

/// Reads a list either from `{ "<key>": [...] }` or from a bare array.
fn list<T: DeserializeOwned>(value: Value, keys: &[&str]) -> Result<Vec<T>> {
    let items = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => keys
            .iter()
            .find_map(|key| map.remove(*key))
            .ok_or_else(|| {
                GenerationError::Malformed(format!("Expected one of {keys:?} in output"))
            })?,
        other => {
            return Err(GenerationError::Malformed(format!(
                "Expected a list, found {other}"
            )))
        }
    };
    serde_json::from_value(items).map_err(|e| GenerationError::Malformed(e.to_string()))
}

pub fn competitors(content: &str) -> Result<Vec<CompetitorRecord>> {
    let mut records: Vec<CompetitorRecord> =
        first_decoded(content, |value| list(value, &["competitors"]))?;
    for record in &mut records {
        record.provenance = Provenance::Generated;
    }
    Ok(records)
}

pub fn market_gaps(content: &str) -> Result<MarketGapAnalysis> {
    first_decoded(content, market_gap_analysis)
}

fn market_gap_analysis(value: Value) -> Result<MarketGapAnalysis> {
    let Value::Object(mut map) = value else {
        return Err(GenerationError::Malformed(
            "Expected a market gap object".to_string(),
        ));
    };

    let summary = map
        .remove("summary")
        .and_then(|v| v.as_str().map(str::to_string));
    let gaps: Vec<MarketGap> = match map.remove("gaps").or_else(|| map.remove("marketGaps")) {
        Some(v) => serde_json::from_value(v).map_err(|e| GenerationError::Malformed(e.to_string()))?,
        None => return Err(GenerationError::Malformed("Missing gaps".to_string())),
    };
    let positioning: Vec<PositioningSuggestion> = match map
        .remove("positioningSuggestions")
        .or_else(|| map.remove("positioning_suggestions"))
    {
        Some(v) => serde_json::from_value(v).map_err(|e| GenerationError::Malformed(e.to_string()))?,
        None => Vec::new(),
    };

    Ok(MarketGapAnalysis {
        gaps: gaps
            .into_iter()
            .map(|gap| MarketGap {
                provenance: Provenance::Generated,
                ..gap
            })
            .collect(),
        positioning_suggestions: positioning
            .into_iter()
            .map(|s| PositioningSuggestion {
                provenance: Provenance::Generated,
                ..s
            })
            .collect(),
        summary,
    })
}

pub fn features(content: &str) -> Result<Vec<FeatureRecord>> {
    let mut records: Vec<FeatureRecord> =
        first_decoded(content, |value| list(value, &["features"]))?;
    for record in &mut records {
        record.provenance = Provenance::Generated;
    }
    Ok(records)
}

pub fn validation_plan(content: &str) -> Result<ValidationPlan> {
    first_decoded(content, plan_from_value)
}

fn plan_from_value(value: Value) -> Result<ValidationPlan> {
    let plan: ValidationPlan = match value {
        Value::Object(mut map) if map.contains_key("validationPlan") => {
            serde_json::from_value(map.remove("validationPlan").unwrap_or_default())
        }
        other @ Value::Object(_) => serde_json::from_value(other),
        _ => {
            return Err(GenerationError::Malformed(
                "Expected a validation plan object".to_string(),
            ))
        }
    }
    .map_err(|e| GenerationError::Malformed(e.to_string()))?;

    if plan.experiments.is_empty() {
        return Err(GenerationError::Malformed(
            "Validation plan has no experiments".to_string(),
        ));
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_from_markdown_fence() {
        let content = "Here you go:\n```json\n{\"competitors\": [{\"name\": \"A}\"}]}\n```\nEnjoy";
        let value = extract_json(content).unwrap();
        assert_eq!(value["competitors"][0]["name"], "A}");
    }

    #[test]
    fn test_extract_rejects_prose() {
        assert!(matches!(
            extract_json("Sorry, I can't help with that."),
            Err(GenerationError::Malformed(_))
        ));
        assert!(extract_json("{\"a\": [1, 2").is_err());
    }

    #[test]
    fn test_citation_markers_before_payload_are_skipped() {
        let content = "Based on [1] and [2], here are the results:\n\
            {\"competitors\": [{\"name\": \"Acme\"}, {\"name\": \"Bolt\"}]}";
        let records = competitors(content).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].name, "Bolt");

        let content = "Sources {see notes} follow.\n{\"summary\":\"s\",\"gaps\":[{\"title\":\"Late hours\"}]}";
        assert_eq!(market_gaps(content).unwrap().gaps[0].title, "Late hours");
    }

    #[test]
    fn test_competitors_accept_bare_array_and_force_provenance() {
        let records =
            competitors(r#"[{"name":"Acme","description":"x","provenance":"synthetic"}]"#).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].provenance, Provenance::Generated);
    }

    #[test]
    fn test_competitors_missing_key_is_malformed() {
        assert!(competitors(r#"{"companies": []}"#).is_err());
    }

    #[test]
    fn test_market_gaps() {
        let analysis = market_gaps(
            r#"{"summary":"s","gaps":[{"title":"Night delivery","description":"none do it"}],
                "positioningSuggestions":[{"statement":"Fastest treats"}]}"#,
        )
        .unwrap();
        assert_eq!(analysis.gaps.len(), 1);
        assert_eq!(analysis.positioning_suggestions[0].statement, "Fastest treats");
        assert_eq!(analysis.summary.as_deref(), Some("s"));
    }

    #[test]
    fn test_validation_plan_requires_experiments() {
        assert!(validation_plan(r#"{"summary":"x","experiments":[]}"#).is_err());
        let plan = validation_plan(
            r#"{"validationPlan":{"summary":"x","experiments":[{"name":"Landing page"}],
                "successCriteria":["100 signups"]}}"#,
        )
        .unwrap();
        assert_eq!(plan.experiments[0].name, "Landing page");
        assert_eq!(plan.success_criteria, vec!["100 signups".to_string()]);
    }
}
