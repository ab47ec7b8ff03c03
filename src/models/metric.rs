use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Exchange identifier used to key rate budgets and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    Binance,
    Synthetic,
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeId::Binance => write!(f, "binance"),
            ExchangeId::Synthetic => write!(f, "synthetic"),
        }
    }
}

/// Snapshot granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 5] = [
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::D1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn duration(&self) -> TimeDelta {
        match self {
            Timeframe::M5 => TimeDelta::minutes(5),
            Timeframe::M15 => TimeDelta::minutes(15),
            Timeframe::M30 => TimeDelta::minutes(30),
            Timeframe::H1 => TimeDelta::hours(1),
            Timeframe::D1 => TimeDelta::days(1),
        }
    }

    /// Start of the period `ts` falls into (e.g. 12:07:31 -> 12:05:00 for 5m).
    pub fn bucket(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        ts.duration_trunc(self.duration()).unwrap_or(ts)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "30m" => Ok(Timeframe::M30),
            "1h" => Ok(Timeframe::H1),
            "1d" => Ok(Timeframe::D1),
            other => Err(format!("Unsupported timeframe: {}", other)),
        }
    }
}

/// Storage key for the "most recent prior row" lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl MetricKey {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
        }
    }
}

/// One symbol's computed snapshot for one fetch cycle and timeframe.
///
/// Optional fields are `None` when the exchange could not provide them this
/// cycle; the row itself is still valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub open_interest_usd: f64,
    pub volume_24h_usd: f64,
    pub price_change_24h_pct: f64,
    pub global_long_short_ratio: Option<f64>,
    pub top_trader_long_short_ratio: Option<f64>,
    pub long_account_pct: Option<f64>,
    pub short_account_pct: Option<f64>,
    /// Top-5 order-book skew in [-100, 100]
    pub imbalance_pct: Option<f64>,
    pub funding_rate_pct: Option<f64>,
    /// Wilder RSI-14, 50.0 when not enough candles
    pub rsi: f64,
    pub cumulative_volume_delta: Option<f64>,
    /// Cycle-level aggregate, identical for every row of a batch
    pub weighted_open_interest_usd: f64,
    /// Approximation (24h quote volume x multiplier), not authoritative
    pub market_cap_usd: f64,
}

impl MetricRow {
    pub fn key(&self) -> MetricKey {
        MetricKey::new(self.symbol.clone(), self.timeframe)
    }
}

/// MetricRow plus the fields that need prior history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedMetricRow {
    #[serde(flatten)]
    pub row: MetricRow,
    pub open_interest_delta_pct: f64,
    pub long_short_delta_pct: f64,
    pub top_trader_long_short_delta_pct: f64,
    /// Clipped to [-10, 10]
    pub z_score_long_short: f64,
    /// Volume pressure index: volume x OI delta / 100
    pub vpi: f64,
}

impl EnrichedMetricRow {
    pub fn key(&self) -> MetricKey {
        self.row.key()
    }
}

/// Quote assets stripped to produce the exchange-neutral ticker
const QUOTE_ASSETS: [&str; 4] = ["USDT", "USDC", "BUSD", "USD"];

/// Turn an exchange-native symbol into an exchange-neutral ticker
/// e.g. "BTCUSDT" -> "BTC", "1000PEPEUSDC" -> "1000PEPE"
pub fn neutral_symbol(native: &str) -> String {
    let upper = native.to_uppercase();
    match quote_asset(&upper) {
        Some(quote) => upper[..upper.len() - quote.len()].to_string(),
        None => upper,
    }
}

/// Known settlement suffix of an exchange-native symbol, "ETHUSDC" -> "USDC"
pub fn quote_asset(native: &str) -> Option<&'static str> {
    let upper = native.to_uppercase();
    QUOTE_ASSETS
        .into_iter()
        .find(|quote| upper.len() > quote.len() && upper.ends_with(quote))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timeframe_round_trip() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
        assert!("2h".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_bucket_truncates_to_period_start() {
        let ts = Utc.with_ymd_and_hms(2025, 10, 20, 12, 7, 31).unwrap();
        assert_eq!(
            Timeframe::M5.bucket(ts),
            Utc.with_ymd_and_hms(2025, 10, 20, 12, 5, 0).unwrap()
        );
        assert_eq!(
            Timeframe::H1.bucket(ts),
            Utc.with_ymd_and_hms(2025, 10, 20, 12, 0, 0).unwrap()
        );
        assert_eq!(
            Timeframe::D1.bucket(ts),
            Utc.with_ymd_and_hms(2025, 10, 20, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_neutral_symbol() {
        assert_eq!(neutral_symbol("BTCUSDT"), "BTC");
        assert_eq!(neutral_symbol("ethusdc"), "ETH");
        assert_eq!(neutral_symbol("1000PEPEUSDT"), "1000PEPE");
        assert_eq!(neutral_symbol("USDT"), "USDT");
    }

    #[test]
    fn test_quote_asset_suffix() {
        assert_eq!(quote_asset("BTCUSDT"), Some("USDT"));
        assert_eq!(quote_asset("btcusdc"), Some("USDC"));
        assert_eq!(quote_asset("ETHBUSD"), Some("BUSD"));
        assert_eq!(quote_asset("BTCUSD"), Some("USD"));
        assert_eq!(quote_asset("USDT"), None);
        assert_eq!(quote_asset("BTCUSDT_251226"), None);
    }

    #[test]
    fn test_timeframe_serde_uses_short_names() {
        assert_eq!(serde_json::to_string(&Timeframe::M15).unwrap(), "\"15m\"");
        let tf: Timeframe = serde_json::from_str("\"1d\"").unwrap();
        assert_eq!(tf, Timeframe::D1);
    }
}
