//! Random-walk market data for local development and demos.
//!
//! Every call nudges the per-symbol state a little so consecutive cycles
//! produce non-trivial deltas, Z-scores and confluence hits without touching
//! a real exchange.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;

use crate::error::MetricsError;
use crate::models::exchange::{
    Candle, ContractKind, Instrument, LongShortRatio, LongShortScope, OrderBookDepth, Ticker,
};
use crate::models::metric::{ExchangeId, Timeframe, quote_asset};
use crate::services::metric_source::MetricSource;

/// (symbol, starting price, starting 24h quote volume)
const UNIVERSE: [(&str, f64, f64); 12] = [
    ("BTCUSDT", 65_000.0, 1.5e10),
    ("ETHUSDT", 3_200.0, 8.0e9),
    ("SOLUSDT", 150.0, 2.5e9),
    ("XRPUSDT", 0.6, 1.2e9),
    ("DOGEUSDT", 0.15, 9.0e8),
    ("BNBUSDT", 580.0, 7.5e8),
    ("ADAUSDT", 0.45, 5.0e8),
    ("AVAXUSDT", 35.0, 4.0e8),
    ("LINKUSDT", 14.0, 3.0e8),
    ("LTCUSDT", 80.0, 2.0e8),
    ("DOTUSDT", 6.5, 1.5e8),
    ("1000PEPEUSDT", 0.012, 6.0e7),
];

#[derive(Debug, Clone)]
struct SyntheticMarket {
    price: f64,
    open_price_24h: f64,
    quote_volume: f64,
    /// Contracts
    open_interest: f64,
    long_short: f64,
    funding_rate: f64,
}

pub struct SyntheticSource {
    markets: Mutex<HashMap<String, SyntheticMarket>>,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticSource {
    pub fn new() -> Self {
        let mut rng = rand::rng();
        let markets = UNIVERSE
            .iter()
            .map(|(symbol, price, volume)| {
                let market = SyntheticMarket {
                    price: *price,
                    open_price_24h: price * rng.random_range(0.95..1.05),
                    quote_volume: *volume,
                    // Roughly 5% of daily volume parked as open interest
                    open_interest: volume * 0.05 / price,
                    long_short: rng.random_range(0.8..2.2),
                    funding_rate: rng.random_range(-0.0002..0.0004),
                };
                (symbol.to_string(), market)
            })
            .collect();

        Self {
            markets: Mutex::new(markets),
        }
    }

    /// Advance one symbol's random walk and return the new state.
    fn step(&self, symbol: &str) -> Result<SyntheticMarket, MetricsError> {
        let mut markets = self.markets.lock();
        let market = markets.get_mut(symbol).ok_or_else(|| unknown_symbol(symbol))?;
        let mut rng = rand::rng();

        market.price *= 1.0 + rng.random_range(-0.004..0.004);
        market.quote_volume *= 1.0 + rng.random_range(-0.02..0.02);
        market.open_interest *= 1.0 + rng.random_range(-0.015..0.015);
        market.long_short = (market.long_short + rng.random_range(-0.08..0.08)).clamp(0.3, 4.0);
        market.funding_rate =
            (market.funding_rate + rng.random_range(-0.00002..0.00002)).clamp(-0.0075, 0.0075);

        Ok(market.clone())
    }

    fn current(&self, symbol: &str) -> Result<SyntheticMarket, MetricsError> {
        self.markets
            .lock()
            .get(symbol)
            .cloned()
            .ok_or_else(|| unknown_symbol(symbol))
    }
}

fn unknown_symbol(symbol: &str) -> MetricsError {
    MetricsError::Api {
        status: 400,
        message: format!("Invalid symbol: {}", symbol),
    }
}

#[async_trait]
impl MetricSource for SyntheticSource {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Synthetic
    }

    async fn fetch_active_instruments(&self) -> Result<Vec<Instrument>, MetricsError> {
        let markets = self.markets.lock();
        Ok(UNIVERSE
            .iter()
            .filter_map(|(symbol, _, _)| {
                markets.get(*symbol).map(|m| Instrument {
                    symbol: symbol.to_string(),
                    contract: ContractKind::Perpetual,
                    active: true,
                    quote_asset: quote_asset(symbol).unwrap_or_default().to_string(),
                    quote_volume_24h: m.quote_volume,
                })
            })
            .collect())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, MetricsError> {
        let market = self.step(symbol)?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            last_price: market.price,
            quote_volume_24h: market.quote_volume,
            price_change_pct_24h: (market.price - market.open_price_24h) / market.open_price_24h
                * 100.0,
        })
    }

    async fn fetch_open_interest(&self, symbol: &str) -> Result<f64, MetricsError> {
        Ok(self.current(symbol)?.open_interest)
    }

    async fn fetch_order_book_depth(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<OrderBookDepth, MetricsError> {
        let market = self.current(symbol)?;
        let mut rng = rand::rng();
        let tick = market.price * 0.0001;
        let base_qty = market.quote_volume / market.price / 1e5;

        let mut depth = OrderBookDepth::default();
        for level in 1..=limit {
            let offset = tick * level as f64;
            depth
                .bids
                .push((market.price - offset, base_qty * rng.random_range(0.2..1.8)));
            depth
                .asks
                .push((market.price + offset, base_qty * rng.random_range(0.2..1.8)));
        }
        Ok(depth)
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, MetricsError> {
        let market = self.current(symbol)?;
        let mut rng = rand::rng();
        let step_ms = interval.duration().num_milliseconds();
        let now_ms = interval.bucket(Utc::now()).timestamp_millis();
        let candle_volume = market.quote_volume / market.price / 288.0;

        // Walk backwards from the current price so the last close matches the ticker
        let mut closes = Vec::with_capacity(limit);
        let mut close = market.price;
        for _ in 0..limit {
            closes.push(close);
            close *= 1.0 + rng.random_range(-0.006..0.006);
        }
        closes.reverse();

        let mut candles = Vec::with_capacity(limit);
        let mut open = close;
        for (i, close) in closes.into_iter().enumerate() {
            let spread = (open - close).abs().max(market.price * 0.0005);
            candles.push(Candle {
                open_time_ms: now_ms - step_ms * (limit - 1 - i) as i64,
                open,
                high: open.max(close) + spread * rng.random_range(0.0..0.5),
                low: open.min(close) - spread * rng.random_range(0.0..0.5),
                close,
                volume: candle_volume * rng.random_range(0.5..1.5),
            });
            open = close;
        }
        Ok(candles)
    }

    async fn fetch_funding_rate(&self, symbol: &str) -> Result<f64, MetricsError> {
        Ok(self.current(symbol)?.funding_rate)
    }

    async fn fetch_long_short_ratio(
        &self,
        symbol: &str,
        _period: Timeframe,
        scope: LongShortScope,
    ) -> Result<LongShortRatio, MetricsError> {
        let market = self.current(symbol)?;
        let ratio = match scope {
            LongShortScope::GlobalAccount => market.long_short,
            // Top accounts lean the other way a little
            LongShortScope::TopTraderAccount => (2.0 - market.long_short * 0.5).max(0.3),
        };
        let long_share = ratio / (1.0 + ratio);
        Ok(LongShortRatio {
            ratio,
            long_pct: long_share * 100.0,
            short_pct: (1.0 - long_share) * 100.0,
        })
    }
}
