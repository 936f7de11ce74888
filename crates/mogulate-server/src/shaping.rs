//! Fits generated results to what a tier promises: list lengths are cut or
//! padded with synthetic placeholders, and gated fields are removed.

use mogulate_common::{
    CompetitorRecord, FeatureRecord, MarketGap, MarketGapAnalysis, PositioningSuggestion,
};
use mogulate_usage::TierLimits;

/// Truncates or backfills `items` to exactly `count`. Placeholders are
/// numbered from the first missing position.
pub fn fit<T>(mut items: Vec<T>, count: usize, placeholder: impl Fn(usize) -> T) -> Vec<T> {
    items.truncate(count);
    let have = items.len();
    items.extend((have..count).map(|i| placeholder(i + 1)));
    items
}

pub fn competitors(records: Vec<CompetitorRecord>, limits: &TierLimits) -> Vec<CompetitorRecord> {
    let mut records = fit(records, limits.competitor_count, CompetitorRecord::placeholder);
    if !limits.include_descriptions {
        for record in &mut records {
            record.description = None;
        }
    }
    records
}

pub fn market_gaps(analysis: MarketGapAnalysis, limits: &TierLimits) -> MarketGapAnalysis {
    MarketGapAnalysis {
        gaps: fit(analysis.gaps, limits.market_gap_count, MarketGap::placeholder),
        positioning_suggestions: fit(
            analysis.positioning_suggestions,
            limits.positioning_count,
            PositioningSuggestion::placeholder,
        ),
        summary: analysis.summary,
    }
}

pub fn features(records: Vec<FeatureRecord>, limits: &TierLimits) -> Vec<FeatureRecord> {
    fit(records, limits.feature_count, FeatureRecord::placeholder)
}
