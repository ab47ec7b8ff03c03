//! Enrichment and persistence of fetched rows.
//!
//! This is the only write path into the metric store. Each (symbol, timeframe)
//! key is serialized through its own async mutex because enrichment reads the
//! prior row and then writes the new one.

use futures_util::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

use crate::error::MetricsError;
use crate::models::metric::{EnrichedMetricRow, MetricKey, MetricRow};
use crate::services::metric_store::MetricStore;
use crate::services::stats::{clip_z_score, finite_or, pct_change, rolling_z_score, sanitize_rsi};

/// Replace non-finite values before they can reach storage.
pub fn sanitize_row(mut row: MetricRow) -> MetricRow {
    fn opt(v: Option<f64>) -> Option<f64> {
        v.filter(|x| x.is_finite())
    }

    row.price = finite_or(row.price, 0.0);
    row.open_interest_usd = finite_or(row.open_interest_usd, 0.0);
    row.volume_24h_usd = finite_or(row.volume_24h_usd, 0.0);
    row.price_change_24h_pct = finite_or(row.price_change_24h_pct, 0.0);
    row.global_long_short_ratio = opt(row.global_long_short_ratio);
    row.top_trader_long_short_ratio = opt(row.top_trader_long_short_ratio);
    row.long_account_pct = opt(row.long_account_pct);
    row.short_account_pct = opt(row.short_account_pct);
    row.imbalance_pct = opt(row.imbalance_pct);
    row.funding_rate_pct = opt(row.funding_rate_pct);
    row.rsi = sanitize_rsi(row.rsi);
    row.cumulative_volume_delta = opt(row.cumulative_volume_delta);
    row.weighted_open_interest_usd = finite_or(row.weighted_open_interest_usd, 0.0);
    row.market_cap_usd = finite_or(row.market_cap_usd, 0.0);
    row
}

/// Derive the history-dependent fields of `row`.
///
/// `history` holds earlier rows for the same key, oldest first; its last
/// element is the prior row. The Z-score runs over the global long/short
/// ratios of at most `z_window - 1` of those rows plus the current one.
/// Pure: the same inputs always give the same output.
pub fn enrich(row: MetricRow, history: &[EnrichedMetricRow], z_window: usize) -> EnrichedMetricRow {
    let row = sanitize_row(row);

    let Some(prior) = history.last() else {
        return EnrichedMetricRow {
            row,
            open_interest_delta_pct: 0.0,
            long_short_delta_pct: 0.0,
            top_trader_long_short_delta_pct: 0.0,
            z_score_long_short: 0.0,
            vpi: 0.0,
        };
    };

    let open_interest_delta_pct =
        pct_change(Some(prior.row.open_interest_usd), Some(row.open_interest_usd));
    let long_short_delta_pct =
        pct_change(prior.row.global_long_short_ratio, row.global_long_short_ratio);
    let top_trader_long_short_delta_pct = pct_change(
        prior.row.top_trader_long_short_ratio,
        row.top_trader_long_short_ratio,
    );

    let z_score_long_short = match row.global_long_short_ratio {
        Some(current) => {
            let take = z_window.saturating_sub(1);
            let start = history.len().saturating_sub(take);
            let mut window: Vec<f64> = history[start..]
                .iter()
                .filter_map(|h| h.row.global_long_short_ratio)
                .collect();
            window.push(current);
            clip_z_score(rolling_z_score(&window))
        }
        None => 0.0,
    };

    let vpi = finite_or(row.volume_24h_usd * open_interest_delta_pct / 100.0, 0.0);

    EnrichedMetricRow {
        row,
        open_interest_delta_pct,
        long_short_delta_pct,
        top_trader_long_short_delta_pct,
        z_score_long_short,
        vpi,
    }
}

pub struct Enricher {
    store: Arc<dyn MetricStore>,
    z_window: usize,
    locks: Mutex<HashMap<MetricKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl Enricher {
    pub fn new(store: Arc<dyn MetricStore>, z_window: usize) -> Self {
        Self {
            store,
            z_window: z_window.max(2),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn MetricStore> {
        &self.store
    }

    fn key_lock(&self, key: &MetricKey) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(key.clone()).or_default().clone()
    }

    /// Enrich against rows from earlier buckets, then upsert.
    ///
    /// The prior row is the newest one strictly before this row's bucket, so
    /// running twice inside one period rewrites the same slot with the same
    /// deltas.
    pub async fn enrich_and_store(&self, row: MetricRow) -> Result<EnrichedMetricRow, MetricsError> {
        let key = row.key();
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let history = self
            .store
            .query_history_before(&key, row.timestamp, self.z_window as u64 - 1)
            .await?;

        let enriched = enrich(row, &history, self.z_window);
        self.store.upsert(&enriched).await?;

        Ok(enriched)
    }

    /// Enrich and store every row. Rows whose store call fails are logged and
    /// left out; the rest of the batch still lands.
    pub async fn enrich_batch(&self, rows: Vec<MetricRow>) -> (Vec<EnrichedMetricRow>, usize) {
        let results = join_all(rows.into_iter().map(|row| async move {
            let key = row.key();
            (key, self.enrich_and_store(row).await)
        }))
        .await;

        let mut enriched = Vec::with_capacity(results.len());
        let mut failures = 0;
        for (key, result) in results {
            match result {
                Ok(row) => enriched.push(row),
                Err(e) => {
                    failures += 1;
                    error!(
                        symbol = %key.symbol,
                        timeframe = %key.timeframe,
                        "Failed to persist metrics: {}",
                        e
                    );
                }
            }
        }

        (enriched, failures)
    }
}
