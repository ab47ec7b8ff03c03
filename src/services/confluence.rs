//! Multi-factor bias score.
//!
//! Three independent triggers each add 1/3 to the score. The function is
//! stateless; the same row always gives the same result.

use crate::models::confluence::{BiasLabel, ConfluenceFactor, ConfluenceResult};
use crate::models::metric::EnrichedMetricRow;

pub const Z_SCORE_TRIGGER: f64 = 2.5;
pub const CROWDED_LONG_RATIO: f64 = 2.0;
/// Mirror of the crowded-long ratio for the short side
pub const CROWDED_SHORT_RATIO: f64 = 0.5;
pub const IMBALANCE_TRIGGER_PCT: f64 = 3.0;

const TRIGGER_COUNT: f64 = 3.0;

pub fn evaluate(row: &EnrichedMetricRow) -> ConfluenceResult {
    let ratio = row.row.global_long_short_ratio;
    let imbalance = row.row.imbalance_pct;

    let mut factors = Vec::with_capacity(3);
    if row.z_score_long_short.abs() > Z_SCORE_TRIGGER {
        factors.push(ConfluenceFactor::ZScoreExtreme);
    }
    if ratio.is_some_and(|r| r > CROWDED_LONG_RATIO) {
        factors.push(ConfluenceFactor::LongShortCrowded);
    }
    if imbalance.is_some_and(|i| i.abs() > IMBALANCE_TRIGGER_PCT) {
        factors.push(ConfluenceFactor::OrderbookImbalance);
    }

    let score = factors.len() as f64 / TRIGGER_COUNT;

    let points_long =
        ratio.is_some_and(|r| r > CROWDED_LONG_RATIO) || imbalance.is_some_and(|i| i > 0.0);
    let points_short =
        ratio.is_some_and(|r| r < CROWDED_SHORT_RATIO) || imbalance.is_some_and(|i| i < 0.0);

    let bias = if score < 1.0 / TRIGGER_COUNT {
        BiasLabel::Neutral
    } else if points_long {
        BiasLabel::Long
    } else if points_short {
        BiasLabel::Short
    } else {
        BiasLabel::Neutral
    };

    ConfluenceResult {
        symbol: row.row.symbol.clone(),
        timeframe: row.row.timeframe,
        score,
        bias,
        contributing_factors: factors,
    }
}

/// Results at or above `threshold`, highest score first.
pub fn alerts(rows: &[EnrichedMetricRow], threshold: f64) -> Vec<ConfluenceResult> {
    let mut results: Vec<ConfluenceResult> = rows
        .iter()
        .map(evaluate)
        .filter(|r| r.score >= threshold)
        .collect();
    results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.symbol.cmp(&b.symbol)));
    results
}
