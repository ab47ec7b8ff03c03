use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::confluence::ConfluenceResult;
use super::metric::{EnrichedMetricRow, Timeframe};

pub const DEFAULT_PAGE_LIMIT: u64 = 20;
pub const MAX_PAGE_LIMIT: u64 = 500;
pub const DEFAULT_HISTORY_LIMIT: u64 = 100;
pub const MAX_HISTORY_LIMIT: u64 = 1000;

/// Query parameters for GET /api/metrics
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsQuery {
    pub tf: Option<String>,     // Default: 5m
    pub limit: Option<u64>,     // Default: 20, max 500
    pub offset: Option<u64>,    // Default: 0
}

/// Response for GET /api/metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsPageResponse {
    pub data: Vec<EnrichedMetricRow>,
    pub total_count: u64,
    pub limit: u64,
    pub offset: u64,
    pub timeframe: Timeframe,
}

/// Query parameters for GET /api/metrics/{symbol}/history
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    pub tf: Option<String>,
    pub limit: Option<u64>,     // Default: 100, max 1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Oldest first
    pub data: Vec<EnrichedMetricRow>,
}

/// Query parameters for GET /api/confluence
#[derive(Debug, Clone, Deserialize)]
pub struct ConfluenceQuery {
    pub tf: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceResponse {
    pub timeframe: Timeframe,
    pub data: Vec<ConfluenceResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub status: String,     // "started" or "in_flight"
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Starting,
    Ok,
    Degraded,
}

/// Response for GET /health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub last_cycle_timestamp: Option<DateTime<Utc>>,
    pub symbols_loaded: usize,
    pub symbols_requested: usize,
    pub last_cycle_duration_ms: u64,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Emitted once per completed cycle for the push layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleEvent {
    pub cycle_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub rows: Vec<EnrichedMetricRow>,
    /// Confluence results whose score crossed the alert threshold
    pub alerts: Vec<ConfluenceResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
