//! Metrics Sync Job
//!
//! Runs one metrics cycle every `POLL_INTERVAL_SECS`. A tick that lands while
//! a cycle (scheduled or on-demand) is still running is skipped.
//! Supports graceful shutdown via SIGTERM/SIGINT signals.

use std::sync::Arc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, warn};

use crate::services::pipeline::MetricsPipeline;

/// Start the metrics sync job
///
/// The first tick fires immediately so the dashboard has data at start-up.
pub async fn start_metrics_sync_job(pipeline: Arc<MetricsPipeline>) {
    tokio::spawn(async move {
        let poll_interval = pipeline.config().poll_interval;

        info!(
            poll_interval_secs = poll_interval.as_secs(),
            timeframes = ?pipeline.config().timeframes,
            symbol_limit = pipeline.config().symbol_limit,
            "Initializing metrics sync job"
        );

        let mut interval = interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received, stopping metrics sync job gracefully");
                    break;
                }
                _ = interval.tick() => {
                    match pipeline.try_run_cycle().await {
                        Some(Ok(summary)) => {
                            if summary.symbols_loaded < summary.symbols_requested {
                                warn!(
                                    loaded = summary.symbols_loaded,
                                    requested = summary.symbols_requested,
                                    "Metrics sync finished with missing symbols"
                                );
                            }
                        }
                        Some(Err(e)) => {
                            // Retried on the next tick
                            error!("Metrics sync failed: {}", e);
                        }
                        None => {
                            warn!("Previous metrics cycle still in flight, skipping tick");
                        }
                    }
                }
            }
        }
    });
}
