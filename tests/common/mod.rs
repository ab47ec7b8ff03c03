#![allow(dead_code)]

use async_trait::async_trait;
use axum::{Router, body::Body, http::Response};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Semaphore;

use futuresboard_backend::config::Config;
use futuresboard_backend::error::MetricsError;
use futuresboard_backend::models::exchange::{
    Candle, ContractKind, Instrument, LongShortRatio, LongShortScope, OrderBookDepth, Ticker,
};
use futuresboard_backend::models::metric::{
    EnrichedMetricRow, ExchangeId, MetricRow, Timeframe, quote_asset,
};
use futuresboard_backend::services::metric_source::MetricSource;
use futuresboard_backend::services::metric_store::{InMemoryMetricStore, MetricStore};
use futuresboard_backend::services::pipeline::MetricsPipeline;
use futuresboard_backend::{AppState, build_router};

/// Exchange stand-in with a fixed book of (price, 24h volume, open interest)
pub struct ScriptedSource {
    pub markets: HashMap<String, (f64, f64, f64)>,
    /// Every call fails with a transient error while set
    pub down: AtomicBool,
    /// When present, instrument listing waits for a permit
    pub gate: Option<Arc<Semaphore>>,
}

impl ScriptedSource {
    pub fn new(markets: &[(&str, f64, f64, f64)]) -> Self {
        Self {
            markets: markets
                .iter()
                .map(|(s, p, v, oi)| (s.to_string(), (*p, *v, *oi)))
                .collect(),
            down: AtomicBool::new(false),
            gate: None,
        }
    }

    fn check(&self) -> Result<(), MetricsError> {
        if self.down.load(Ordering::SeqCst) {
            Err(MetricsError::NetworkTransient("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    fn market(&self, symbol: &str) -> Result<(f64, f64, f64), MetricsError> {
        self.check()?;
        self.markets.get(symbol).copied().ok_or_else(|| MetricsError::Api {
            status: 400,
            message: "Invalid symbol".to_string(),
        })
    }
}

#[async_trait]
impl MetricSource for ScriptedSource {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Synthetic
    }

    async fn fetch_active_instruments(&self) -> Result<Vec<Instrument>, MetricsError> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }
        Ok(self
            .markets
            .iter()
            .map(|(symbol, (_, volume, _))| Instrument {
                symbol: symbol.clone(),
                contract: ContractKind::Perpetual,
                active: true,
                quote_asset: quote_asset(symbol).unwrap_or_default().to_string(),
                quote_volume_24h: *volume,
            })
            .collect())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, MetricsError> {
        let (price, volume, _) = self.market(symbol)?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            last_price: price,
            quote_volume_24h: volume,
            price_change_pct_24h: -0.8,
        })
    }

    async fn fetch_open_interest(&self, symbol: &str) -> Result<f64, MetricsError> {
        Ok(self.market(symbol)?.2)
    }

    async fn fetch_order_book_depth(
        &self,
        symbol: &str,
        _limit: usize,
    ) -> Result<OrderBookDepth, MetricsError> {
        let (price, _, _) = self.market(symbol)?;
        Ok(OrderBookDepth {
            bids: vec![(price, 5.0)],
            asks: vec![(price * 1.0001, 5.0)],
        })
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, MetricsError> {
        let (price, _, _) = self.market(symbol)?;
        let step = interval.duration().num_milliseconds();
        Ok((0..limit as i64)
            .map(|i| {
                let close = price * (1.0 + 0.001 * (i % 3) as f64);
                Candle {
                    open_time_ms: i * step,
                    open: price,
                    high: close.max(price),
                    low: close.min(price),
                    close,
                    volume: 10.0,
                }
            })
            .collect())
    }

    async fn fetch_funding_rate(&self, symbol: &str) -> Result<f64, MetricsError> {
        self.market(symbol)?;
        Ok(0.0001)
    }

    async fn fetch_long_short_ratio(
        &self,
        symbol: &str,
        _period: Timeframe,
        _scope: LongShortScope,
    ) -> Result<LongShortRatio, MetricsError> {
        self.market(symbol)?;
        Ok(LongShortRatio {
            ratio: 1.2,
            long_pct: 54.5,
            short_pct: 45.5,
        })
    }
}

pub fn ts(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 20, 12, 0, 0).unwrap() + TimeDelta::minutes(minute)
}

/// Stored row with the fields the API tests look at
pub fn stored_row(
    symbol: &str,
    timeframe: Timeframe,
    timestamp: DateTime<Utc>,
    volume: f64,
    long_short: Option<f64>,
    imbalance: Option<f64>,
    z: f64,
) -> EnrichedMetricRow {
    EnrichedMetricRow {
        row: MetricRow {
            symbol: symbol.to_string(),
            timeframe,
            timestamp,
            price: 100.0,
            open_interest_usd: 5e8,
            volume_24h_usd: volume,
            price_change_24h_pct: 1.0,
            global_long_short_ratio: long_short,
            top_trader_long_short_ratio: None,
            long_account_pct: None,
            short_account_pct: None,
            imbalance_pct: imbalance,
            funding_rate_pct: Some(0.01),
            rsi: 50.0,
            cumulative_volume_delta: None,
            weighted_open_interest_usd: 5e8,
            market_cap_usd: volume * 40.0,
        },
        open_interest_delta_pct: 0.0,
        long_short_delta_pct: 0.0,
        top_trader_long_short_delta_pct: 0.0,
        z_score_long_short: z,
        vpi: 0.0,
    }
}

pub fn test_pipeline(source: Arc<dyn MetricSource>) -> (Arc<MetricsPipeline>, Arc<InMemoryMetricStore>) {
    let store = Arc::new(InMemoryMetricStore::new());
    let store_dyn: Arc<dyn MetricStore> = store.clone();
    let pipeline = MetricsPipeline::new(Arc::new(Config::default()), source, store_dyn);
    (Arc::new(pipeline), store)
}

pub fn test_router(pipeline: Arc<MetricsPipeline>) -> Router {
    build_router(AppState::new(pipeline))
}

pub async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&body).expect("Response is not JSON")
}
