//! Cycle health bookkeeping behind GET /health.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::Duration;

use crate::error::MetricsError;
use crate::models::api::{HealthResponse, HealthStatus};

/// What a finished cycle reports
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub timestamp: DateTime<Utc>,
    pub symbols_requested: usize,
    pub symbols_loaded: usize,
    pub persistence_failures: usize,
    pub duration: Duration,
}

pub struct HealthTracker {
    state: RwLock<HealthResponse>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HealthResponse {
                status: HealthStatus::Starting,
                last_cycle_timestamp: None,
                symbols_loaded: 0,
                symbols_requested: 0,
                last_cycle_duration_ms: 0,
                consecutive_failures: 0,
                last_error: None,
            }),
        }
    }

    pub fn snapshot(&self) -> HealthResponse {
        self.state.read().clone()
    }

    pub fn record_success(&self, report: &CycleReport) {
        let mut state = self.state.write();
        let partial = report.symbols_loaded < report.symbols_requested;

        state.status = if partial || report.persistence_failures > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        };
        state.last_cycle_timestamp = Some(report.timestamp);
        state.symbols_loaded = report.symbols_loaded;
        state.symbols_requested = report.symbols_requested;
        state.last_cycle_duration_ms = report.duration.as_millis() as u64;
        state.consecutive_failures = 0;
        state.last_error = if report.persistence_failures > 0 {
            Some(format!("{} rows failed to persist", report.persistence_failures))
        } else if partial {
            Some(format!(
                "{} of {} symbol fetches failed",
                report.symbols_requested - report.symbols_loaded,
                report.symbols_requested
            ))
        } else {
            None
        };
    }

    /// A failed cycle keeps the last successful timestamp so staleness shows.
    pub fn record_failure(&self, error: &MetricsError, symbols_requested: usize, duration: Duration) {
        let mut state = self.state.write();
        state.status = HealthStatus::Degraded;
        state.symbols_loaded = 0;
        state.symbols_requested = symbols_requested;
        state.last_cycle_duration_ms = duration.as_millis() as u64;
        state.consecutive_failures += 1;
        state.last_error = Some(error.to_string());
    }
}
