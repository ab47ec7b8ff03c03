//! Typed exchange data produced by the parsing step right after each raw fetch.
//! Anything string-typed or mixed-case upstream is converted here, never later.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractKind {
    Perpetual,
    Delivery,
    Other,
}

/// Tradable instrument with the metadata and 24h activity the selector needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Exchange-native symbol, e.g. "BTCUSDT"
    pub symbol: String,
    pub contract: ContractKind,
    pub active: bool,
    /// Settlement asset, e.g. "USDT"
    pub quote_asset: String,
    pub quote_volume_24h: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: f64,
    pub quote_volume_24h: f64,
    pub price_change_pct_24h: f64,
}

/// (price, quantity) levels, best first
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderBookDepth {
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

impl OrderBookDepth {
    pub fn bid_volume(&self, levels: usize) -> f64 {
        self.bids.iter().take(levels).map(|(_, q)| q).sum()
    }

    pub fn ask_volume(&self, levels: usize) -> f64 {
        self.asks.iter().take(levels).map(|(_, q)| q).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LongShortScope {
    GlobalAccount,
    TopTraderAccount,
}

impl LongShortScope {
    pub fn field_name(&self) -> &'static str {
        match self {
            LongShortScope::GlobalAccount => "global_long_short_ratio",
            LongShortScope::TopTraderAccount => "top_trader_long_short_ratio",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongShortRatio {
    pub ratio: f64,
    /// Share of accounts net long, in percent
    pub long_pct: f64,
    pub short_pct: f64,
}
