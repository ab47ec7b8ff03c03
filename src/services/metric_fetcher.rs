//! Builds one [`MetricRow`] per symbol from the raw exchange endpoints.
//!
//! Ticker and open interest are required; everything else degrades to `None`
//! (or the documented default) when it cannot be fetched.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::MetricsError;
use crate::models::exchange::{Candle, LongShortScope};
use crate::models::metric::{MetricRow, Timeframe, neutral_symbol};
use crate::services::metric_source::MetricSource;
use crate::services::rate_controller::RateController;
use crate::services::stats::{RSI_NEUTRAL, RSI_PERIOD, finite_or, imbalance_pct, wilder_rsi};

pub const DEPTH_LEVELS: usize = 5;
/// One kline request feeds RSI-14 and the 5-candle CVD
pub const CANDLE_LIMIT: usize = 50;
pub const CVD_CANDLES: usize = 5;

pub struct MetricFetcher {
    rate: Arc<RateController>,
    market_cap_multiplier: f64,
}

impl MetricFetcher {
    pub fn new(rate: Arc<RateController>, market_cap_multiplier: f64) -> Self {
        Self {
            rate,
            market_cap_multiplier,
        }
    }

    pub fn rate(&self) -> &Arc<RateController> {
        &self.rate
    }

    /// Fetch and assemble a row for `symbol` (exchange-native) at `now`.
    ///
    /// Returns `RateLimited` when a required call was throttled so the caller
    /// can back off, `SymbolFetchFailed` for any other required-field failure.
    pub async fn fetch_metrics(
        &self,
        source: &dyn MetricSource,
        symbol: &str,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Result<MetricRow, MetricsError> {
        let exchange = source.exchange();
        let rate = &self.rate;

        let (ticker, open_interest) = tokio::join!(
            rate.execute(exchange, "ticker", move || source.fetch_ticker(symbol)),
            rate.execute(exchange, "open_interest", move || {
                source.fetch_open_interest(symbol)
            }),
        );
        let ticker = ticker.map_err(|e| required_failure(symbol, "ticker", e))?;
        let open_interest = open_interest.map_err(|e| required_failure(symbol, "open_interest", e))?;

        let (depth, candles, funding, global_ls, top_ls) = tokio::join!(
            rate.execute(exchange, "depth", move || {
                source.fetch_order_book_depth(symbol, DEPTH_LEVELS)
            }),
            rate.execute(exchange, "candles", move || {
                source.fetch_candles(symbol, timeframe, CANDLE_LIMIT)
            }),
            rate.execute(exchange, "funding", move || source.fetch_funding_rate(symbol)),
            rate.execute(exchange, "global_long_short", move || {
                source.fetch_long_short_ratio(symbol, timeframe, LongShortScope::GlobalAccount)
            }),
            rate.execute(exchange, "top_long_short", move || {
                source.fetch_long_short_ratio(symbol, timeframe, LongShortScope::TopTraderAccount)
            }),
        );

        let depth = optional(symbol, "imbalance_pct", depth);
        let candles = optional(symbol, "candles", candles);
        let funding = optional(symbol, "funding_rate_pct", funding);
        let global_ls = optional(symbol, LongShortScope::GlobalAccount.field_name(), global_ls);
        let top_ls = optional(symbol, LongShortScope::TopTraderAccount.field_name(), top_ls);

        let (rsi, cvd) = match &candles {
            Some(candles) => {
                let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
                (wilder_rsi(&closes, RSI_PERIOD), cumulative_volume_delta(candles))
            }
            None => (RSI_NEUTRAL, None),
        };

        let row = MetricRow {
            symbol: neutral_symbol(symbol),
            timeframe,
            timestamp: timeframe.bucket(now),
            price: ticker.last_price,
            open_interest_usd: finite_or(open_interest * ticker.last_price, 0.0),
            volume_24h_usd: ticker.quote_volume_24h,
            price_change_24h_pct: ticker.price_change_pct_24h,
            global_long_short_ratio: global_ls.as_ref().map(|r| r.ratio),
            top_trader_long_short_ratio: top_ls.as_ref().map(|r| r.ratio),
            long_account_pct: global_ls.as_ref().map(|r| r.long_pct),
            short_account_pct: global_ls.as_ref().map(|r| r.short_pct),
            imbalance_pct: depth.map(|d| {
                imbalance_pct(d.bid_volume(DEPTH_LEVELS), d.ask_volume(DEPTH_LEVELS))
            }),
            funding_rate_pct: funding.map(|f| finite_or(f * 100.0, 0.0)),
            rsi,
            cumulative_volume_delta: cvd,
            weighted_open_interest_usd: 0.0,
            market_cap_usd: finite_or(ticker.quote_volume_24h * self.market_cap_multiplier, 0.0),
        };

        debug!(
            symbol = %row.symbol,
            timeframe = %timeframe,
            price = row.price,
            oi_usd = row.open_interest_usd,
            "Fetched metrics"
        );

        Ok(row)
    }
}

/// Signed volume of the last five candles: up-candles add, the rest subtract.
pub fn cumulative_volume_delta(candles: &[Candle]) -> Option<f64> {
    if candles.is_empty() {
        return None;
    }

    let start = candles.len().saturating_sub(CVD_CANDLES);
    let cvd = candles[start..]
        .iter()
        .map(|c| if c.close > c.open { c.volume } else { -c.volume })
        .sum::<f64>();

    Some(finite_or(cvd, 0.0))
}

fn required_failure(symbol: &str, field: &str, e: MetricsError) -> MetricsError {
    if e.is_rate_limited() {
        return e;
    }
    MetricsError::SymbolFetchFailed {
        symbol: symbol.to_string(),
        reason: format!("{}: {}", field, e),
    }
}

fn optional<T>(symbol: &str, field: &'static str, result: Result<T, MetricsError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            let degraded = match e {
                e @ MetricsError::DataUnavailable { .. } => e,
                other => MetricsError::DataUnavailable {
                    symbol: symbol.to_string(),
                    field,
                    reason: other.to_string(),
                },
            };
            warn!("{}", degraded);
            None
        }
    }
}
