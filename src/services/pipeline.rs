//! One fetch cycle end to end: select, collect, aggregate, enrich, emit.
//!
//! The scheduler job and `POST /api/metrics/refresh` share one in-flight
//! guard, so two cycles never overlap.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, broadcast};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::MetricsError;
use crate::models::api::CycleEvent;
use crate::services::aggregator::apply_weighted_open_interest;
use crate::services::batch_orchestrator::BatchOrchestrator;
use crate::services::confluence;
use crate::services::enrichment::Enricher;
use crate::services::health::{CycleReport, HealthTracker};
use crate::services::metric_fetcher::MetricFetcher;
use crate::services::metric_source::MetricSource;
use crate::services::metric_store::MetricStore;
use crate::services::rate_controller::RateController;
use crate::services::symbol_selector::SymbolSelector;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub symbols_requested: usize,
    pub symbols_loaded: usize,
    pub rows_stored: usize,
    pub alerts: usize,
    pub persistence_failures: usize,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    InFlight,
}

pub struct MetricsPipeline {
    config: Arc<Config>,
    source: Arc<dyn MetricSource>,
    rate: Arc<RateController>,
    selector: SymbolSelector,
    orchestrator: BatchOrchestrator,
    enricher: Enricher,
    health: HealthTracker,
    events: broadcast::Sender<CycleEvent>,
    in_flight: Arc<Mutex<()>>,
}

impl MetricsPipeline {
    pub fn new(
        config: Arc<Config>,
        source: Arc<dyn MetricSource>,
        store: Arc<dyn MetricStore>,
    ) -> Self {
        let rate = Arc::new(RateController::new(config.rate.clone()));
        let fetcher = MetricFetcher::new(rate.clone(), config.market_cap_multiplier);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            selector: SymbolSelector::new(
                config.liquidity_floor_usd,
                config.symbols.clone(),
                &config.quote_asset,
            ),
            orchestrator: BatchOrchestrator::new(fetcher, config.chunk_size),
            enricher: Enricher::new(store, config.z_score_window),
            health: HealthTracker::new(),
            rate,
            source,
            config,
            events,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MetricStore> {
        self.enricher.store()
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    /// Receive one [`CycleEvent`] per completed cycle
    pub fn subscribe(&self) -> broadcast::Receiver<CycleEvent> {
        self.events.subscribe()
    }

    /// Run a cycle now unless one is already running.
    ///
    /// `None` means the trigger was skipped because another cycle holds the
    /// in-flight guard.
    pub async fn try_run_cycle(&self) -> Option<Result<CycleSummary, MetricsError>> {
        let _guard = self.in_flight.try_lock().ok()?;
        Some(self.run_cycle_at(Utc::now()).await)
    }

    /// Start a cycle in the background for the on-demand endpoint.
    pub fn trigger(self: &Arc<Self>) -> TriggerOutcome {
        let Ok(guard) = self.in_flight.clone().try_lock_owned() else {
            return TriggerOutcome::InFlight;
        };

        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = pipeline.run_cycle_at(Utc::now()).await {
                error!("On-demand metrics cycle failed: {}", e);
            }
        });

        TriggerOutcome::Started
    }

    async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleSummary, MetricsError> {
        let started = Instant::now();
        let cycle_id = Uuid::new_v4();
        let exchange = self.source.exchange();

        info!(cycle_id = %cycle_id, exchange = %exchange, "Starting metrics cycle");

        let symbols = match self
            .selector
            .select_top_symbols(
                self.source.as_ref(),
                &self.rate,
                self.config.symbol_limit,
                self.config.symbol_offset,
            )
            .await
        {
            Ok(symbols) => symbols,
            Err(e) => {
                error!(cycle_id = %cycle_id, "Symbol selection failed: {}", e);
                self.health.record_failure(&e, 0, started.elapsed());
                return Err(e);
            }
        };

        if symbols.is_empty() {
            warn!(cycle_id = %cycle_id, "No instruments passed the liquidity floor");
        }

        let mut stored = Vec::new();
        let mut fetched_total = 0;
        let mut symbols_loaded = symbols.len();
        let mut persistence_failures = 0;

        for &timeframe in &self.config.timeframes {
            let mut outcome = self
                .orchestrator
                .collect_all(self.source.as_ref(), &symbols, timeframe, now)
                .await;

            fetched_total += outcome.rows.len();
            symbols_loaded = symbols_loaded.min(outcome.rows.len());

            let weighted = apply_weighted_open_interest(&mut outcome.rows);
            tracing::debug!(
                cycle_id = %cycle_id,
                timeframe = %timeframe,
                "Weighted open interest: {:.0} USD",
                weighted
            );

            let (rows, failures) = self.enricher.enrich_batch(outcome.rows).await;
            persistence_failures += failures;
            stored.extend(rows);
        }

        let duration = started.elapsed();

        if !symbols.is_empty() && fetched_total == 0 {
            let err = MetricsError::ExchangeUnreachable {
                exchange,
                attempted: symbols.len(),
            };
            error!(cycle_id = %cycle_id, "Metrics cycle failed: {}", err);
            self.health.record_failure(&err, symbols.len(), duration);
            return Err(err);
        }

        let alerts = confluence::alerts(&stored, self.config.alert_threshold);
        let summary = CycleSummary {
            cycle_id,
            timestamp: now,
            symbols_requested: symbols.len(),
            symbols_loaded,
            rows_stored: stored.len(),
            alerts: alerts.len(),
            persistence_failures,
            duration,
        };

        // No subscribers is fine
        let _ = self.events.send(CycleEvent {
            cycle_id,
            timestamp: now,
            rows: stored,
            alerts,
        });

        self.health.record_success(&CycleReport {
            timestamp: now,
            symbols_requested: summary.symbols_requested,
            symbols_loaded: summary.symbols_loaded,
            persistence_failures,
            duration,
        });

        if duration > self.config.poll_interval {
            warn!(
                cycle_id = %cycle_id,
                duration_ms = duration.as_millis() as u64,
                "Metrics cycle took longer than the poll interval ({:?})",
                self.config.poll_interval
            );
        }

        info!(
            cycle_id = %cycle_id,
            loaded = summary.symbols_loaded,
            requested = summary.symbols_requested,
            rows = summary.rows_stored,
            alerts = summary.alerts,
            duration_ms = duration.as_millis() as u64,
            "Metrics cycle complete"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::api::HealthStatus;
    use crate::models::metric::{MetricKey, Timeframe};
    use crate::services::metric_source::mock::MockSource;
    use crate::services::metric_store::InMemoryMetricStore;
    use chrono::{TimeDelta, TimeZone};

    fn pipeline(source: MockSource, config: Config) -> (Arc<MetricsPipeline>, Arc<InMemoryMetricStore>) {
        let store = Arc::new(InMemoryMetricStore::new());
        let pipeline = MetricsPipeline::new(Arc::new(config), Arc::new(source), store.clone());
        (Arc::new(pipeline), store)
    }

    fn markets() -> MockSource {
        MockSource::with_markets(&[
            ("BTCUSDT", 65_000.0, 9e9, 80_000.0),
            ("ETHUSDT", 3_000.0, 5e9, 1_200_000.0),
            ("SOLUSDT", 150.0, 2e9, 9_000_000.0),
        ])
    }

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 20, 12, 0, 0).unwrap() + TimeDelta::minutes(minute)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_stores_rows_and_emits_event() {
        let (pipeline, store) = pipeline(markets(), Config::default());
        let mut events = pipeline.subscribe();

        let summary = pipeline.run_cycle_at(at(7)).await.unwrap();
        assert_eq!(summary.symbols_requested, 3);
        assert_eq!(summary.symbols_loaded, 3);
        assert_eq!(summary.rows_stored, 3);
        assert_eq!(store.len(), 3);

        let event = events.recv().await.unwrap();
        assert_eq!(event.cycle_id, summary.cycle_id);
        assert_eq!(event.rows.len(), 3);
        let weighted = event.rows[0].row.weighted_open_interest_usd;
        assert!(weighted > 0.0);
        assert!(event.rows.iter().all(|r| r.row.weighted_open_interest_usd == weighted));

        let health = pipeline.health().snapshot();
        assert_eq!(health.status, HealthStatus::Ok);
        assert_eq!(health.last_cycle_timestamp, Some(at(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_bucket_sees_prior_row() {
        let (pipeline, store) = pipeline(markets(), Config::default());
        pipeline.run_cycle_at(at(7)).await.unwrap();
        pipeline.run_cycle_at(at(12)).await.unwrap();

        let history = store
            .query_history(&MetricKey::new("BTC", Timeframe::M5), 10)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].row.timestamp, at(5));
        assert_eq!(history[1].row.timestamp, at(10));
        assert_eq!(history[1].open_interest_delta_pct, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_quote_contracts_do_not_share_a_key() {
        let source = MockSource::with_markets(&[
            ("BTCUSDT", 65_000.0, 9e9, 80_000.0),
            ("BTCUSDC", 65_000.0, 2e9, 5_000.0),
        ]);
        let (pipeline, store) = pipeline(source, Config::default());

        let first = pipeline.run_cycle_at(at(7)).await.unwrap();
        pipeline.run_cycle_at(at(12)).await.unwrap();
        assert_eq!(first.symbols_requested, 1);

        let history = store
            .query_history(&MetricKey::new("BTC", Timeframe::M5), 10)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        for row in &history {
            assert_eq!(row.row.open_interest_usd, 65_000.0 * 80_000.0);
            assert_eq!(row.open_interest_delta_pct, 0.0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_timeframe_is_collected() {
        let config = Config {
            timeframes: vec![Timeframe::M5, Timeframe::H1],
            ..Config::default()
        };
        let (pipeline, store) = pipeline(markets(), config);

        let summary = pipeline.run_cycle_at(at(7)).await.unwrap();
        assert_eq!(summary.rows_stored, 6);
        assert_eq!(store.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_degrades_health() {
        let mut source = markets();
        source.failing.insert("SOLUSDT".to_string());
        let (pipeline, _) = pipeline(source, Config::default());

        let summary = pipeline.run_cycle_at(at(7)).await.unwrap();
        assert_eq!(summary.symbols_loaded, 2);

        let health = pipeline.health().snapshot();
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.symbols_requested, 3);
        assert_eq!(health.symbols_loaded, 2);
        assert_eq!(health.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_symbols_failing_is_a_cycle_failure() {
        let mut source = markets();
        for symbol in ["BTCUSDT", "ETHUSDT", "SOLUSDT"] {
            source.failing.insert(symbol.to_string());
        }
        let (pipeline, store) = pipeline(source, Config::default());

        let err = pipeline.run_cycle_at(at(7)).await.unwrap_err();
        assert!(matches!(err, MetricsError::ExchangeUnreachable { attempted: 3, .. }));
        assert!(store.is_empty());

        let health = pipeline.health().snapshot();
        assert_eq!(health.consecutive_failures, 1);
        assert!(health.last_cycle_timestamp.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_cycle_is_skipped() {
        let (pipeline, store) = pipeline(markets(), Config::default());

        let guard = pipeline.in_flight.clone().try_lock_owned().unwrap();
        assert!(pipeline.try_run_cycle().await.is_none());
        assert_eq!(pipeline.trigger(), TriggerOutcome::InFlight);
        assert!(store.is_empty());

        drop(guard);
        assert!(pipeline.try_run_cycle().await.unwrap().is_ok());
        assert_eq!(store.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_runs_in_background() {
        let (pipeline, _) = pipeline(markets(), Config::default());
        let mut events = pipeline.subscribe();

        assert_eq!(pipeline.trigger(), TriggerOutcome::Started);
        let event = events.recv().await.unwrap();
        assert_eq!(event.rows.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_alerts_follow_threshold() {
        let mut source = markets();
        source.markets.get_mut("BTCUSDT").unwrap().long_short = 2.4;
        let config = Config {
            alert_threshold: 0.3,
            ..Config::default()
        };
        let (pipeline, _) = pipeline(source, config);
        let mut events = pipeline.subscribe();

        pipeline.run_cycle_at(at(7)).await.unwrap();
        let event = events.recv().await.unwrap();
        // mock depth skews bids 10 vs asks 5, so every symbol trips the imbalance rule
        assert_eq!(event.alerts.len(), 3);
        assert_eq!(event.alerts[0].symbol, "BTC");
    }
}
