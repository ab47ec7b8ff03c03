//! Exchange access boundary.
//!
//! The pipeline only talks to an exchange through [`MetricSource`]. The live
//! Binance client and the synthetic random-walk source both implement it and
//! are picked at construction time from configuration.

use async_trait::async_trait;

use crate::error::MetricsError;
use crate::models::exchange::{
    Candle, Instrument, LongShortRatio, LongShortScope, OrderBookDepth, Ticker,
};
use crate::models::metric::{ExchangeId, Timeframe};

#[async_trait]
pub trait MetricSource: Send + Sync {
    fn exchange(&self) -> ExchangeId;

    /// Every listed instrument with its contract type, status and 24h quote volume
    async fn fetch_active_instruments(&self) -> Result<Vec<Instrument>, MetricsError>;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, MetricsError>;

    /// Open interest in contracts (base-asset units)
    async fn fetch_open_interest(&self, symbol: &str) -> Result<f64, MetricsError>;

    async fn fetch_order_book_depth(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<OrderBookDepth, MetricsError>;

    /// Oldest first
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, MetricsError>;

    /// Last funding rate as a fraction (0.0001 = 0.01%)
    async fn fetch_funding_rate(&self, symbol: &str) -> Result<f64, MetricsError>;

    async fn fetch_long_short_ratio(
        &self,
        symbol: &str,
        period: Timeframe,
        scope: LongShortScope,
    ) -> Result<LongShortRatio, MetricsError>;
}
