//! Chunked, concurrent collection of one timeframe's rows.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rand::Rng;
use std::time::Duration;
use tracing::{info, warn};

use crate::models::metric::{MetricRow, Timeframe};
use crate::services::metric_fetcher::MetricFetcher;
use crate::services::metric_source::MetricSource;

const CHUNK_JITTER_MIN_SECS: f64 = 0.1;
const CHUNK_JITTER_MAX_SECS: f64 = 0.5;

/// Result of one `collect_all` pass
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Successful rows, in no particular order within a chunk
    pub rows: Vec<MetricRow>,
    /// Exchange-native symbols dropped this cycle
    pub failed: Vec<String>,
    pub rate_limited_chunks: usize,
}

pub struct BatchOrchestrator {
    fetcher: MetricFetcher,
    chunk_size: usize,
}

impl BatchOrchestrator {
    pub fn new(fetcher: MetricFetcher, chunk_size: usize) -> Self {
        Self {
            fetcher,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Fetch every symbol, chunk by chunk. Failed symbols are logged and left
    /// out; a single failure never aborts the batch.
    pub async fn collect_all(
        &self,
        source: &dyn MetricSource,
        symbols: &[String],
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let chunk_count = symbols.len().div_ceil(self.chunk_size);

        for (chunk_idx, chunk) in symbols.chunks(self.chunk_size).enumerate() {
            let futures: Vec<_> = chunk
                .iter()
                .map(|symbol| async move {
                    let result = self
                        .fetcher
                        .fetch_metrics(source, symbol, timeframe, now)
                        .await;
                    (symbol, result)
                })
                .collect();

            let mut throttled = false;
            for (symbol, result) in join_all(futures).await {
                match result {
                    Ok(row) => outcome.rows.push(row),
                    Err(e) => {
                        throttled |= e.is_rate_limited();
                        warn!(symbol = %symbol, timeframe = %timeframe, "Dropping symbol for this cycle: {}", e);
                        outcome.failed.push(symbol.clone());
                    }
                }
            }

            if !throttled {
                self.fetcher.rate().on_success(source.exchange());
            }

            if chunk_idx + 1 < chunk_count {
                if throttled {
                    outcome.rate_limited_chunks += 1;
                    self.fetcher.rate().backoff_and_sleep(source.exchange()).await;
                } else {
                    tokio::time::sleep(chunk_jitter()).await;
                }
            } else if throttled {
                outcome.rate_limited_chunks += 1;
            }
        }

        info!(
            "Collected {}/{} {} rows ({} failed, {} throttled chunks)",
            outcome.rows.len(),
            symbols.len(),
            timeframe,
            outcome.failed.len(),
            outcome.rate_limited_chunks
        );

        outcome
    }
}

fn chunk_jitter() -> Duration {
    Duration::from_secs_f64(rand::rng().random_range(CHUNK_JITTER_MIN_SECS..CHUNK_JITTER_MAX_SECS))
}
