use serde::{Deserialize, Serialize};

use super::metric::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BiasLabel {
    Long,
    Short,
    Neutral,
}

/// Rules that can fire in a confluence evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfluenceFactor {
    /// |z| > 2.5
    ZScoreExtreme,
    /// global long/short ratio > 2.0
    LongShortCrowded,
    /// |imbalance| > 3%
    OrderbookImbalance,
}

/// Output of the confluence evaluator. Derived on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfluenceResult {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// In [0, 1], steps of 1/3
    pub score: f64,
    pub bias: BiasLabel,
    pub contributing_factors: Vec<ConfluenceFactor>,
}
