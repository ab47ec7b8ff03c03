//! Runtime configuration read from the environment.
//!
//! Every key has a default so the service starts with an empty environment.
//! Invalid values fall back to the default with a warning.

use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::models::metric::Timeframe;

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_BIND_ADDR: &str = "BIND_ADDR";
pub const ENV_METRIC_SOURCE: &str = "METRIC_SOURCE";
pub const ENV_API_BASE_URL: &str = "EXCHANGE_API_BASE_URL";
pub const ENV_SYMBOLS: &str = "SYMBOLS";
pub const ENV_SYMBOL_LIMIT: &str = "SYMBOL_LIMIT";
pub const ENV_SYMBOL_OFFSET: &str = "SYMBOL_OFFSET";
pub const ENV_LIQUIDITY_FLOOR: &str = "LIQUIDITY_FLOOR_USD";
pub const ENV_CHUNK_SIZE: &str = "CHUNK_SIZE";
pub const ENV_MAX_CONCURRENT: &str = "MAX_CONCURRENT_REQUESTS";
pub const ENV_POLL_INTERVAL: &str = "POLL_INTERVAL_SECS";
pub const ENV_TIMEFRAMES: &str = "TIMEFRAMES";
pub const ENV_REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT_SECS";
pub const ENV_MAX_RETRIES: &str = "MAX_RETRIES";
pub const ENV_BACKOFF_FLOOR: &str = "BACKOFF_FLOOR_SECS";
pub const ENV_BACKOFF_CEILING: &str = "BACKOFF_CEILING_SECS";
pub const ENV_Z_SCORE_WINDOW: &str = "Z_SCORE_WINDOW";
pub const ENV_MARKET_CAP_MULTIPLIER: &str = "MARKET_CAP_MULTIPLIER";
pub const ENV_ALERT_THRESHOLD: &str = "ALERT_THRESHOLD";
pub const ENV_INSTRUMENT_CACHE_TTL: &str = "INSTRUMENT_CACHE_TTL_SECS";
pub const ENV_QUOTE_ASSET: &str = "QUOTE_ASSET";

/// Which `MetricSource` implementation to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Live,
    Synthetic,
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "live" | "binance" => Ok(SourceKind::Live),
            "synthetic" | "mock" | "dev" => Ok(SourceKind::Synthetic),
            other => Err(format!("Unknown metric source: {}", other)),
        }
    }
}

/// Rate controller tuning
#[derive(Debug, Clone, PartialEq)]
pub struct RateSettings {
    pub max_concurrent: usize,
    pub backoff_floor_secs: f64,
    pub backoff_ceiling_secs: f64,
    /// Retries after the first attempt for retryable errors
    pub max_retries: u32,
    pub request_timeout: Duration,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            backoff_floor_secs: 0.2,
            backoff_ceiling_secs: 10.0,
            max_retries: 2,
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub source: SourceKind,
    pub api_base_url: String,
    /// Settlement asset of the contracts tracked; one per run so neutral
    /// symbols ("BTC") stay unique
    pub quote_asset: String,
    /// Optional allow-list of exchange-native symbols
    pub symbols: Vec<String>,
    pub symbol_limit: usize,
    pub symbol_offset: usize,
    pub liquidity_floor_usd: f64,
    pub chunk_size: usize,
    pub poll_interval: Duration,
    pub timeframes: Vec<Timeframe>,
    pub rate: RateSettings,
    pub z_score_window: usize,
    pub market_cap_multiplier: f64,
    pub alert_threshold: f64,
    pub instrument_cache_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            bind_addr: "0.0.0.0:3000".to_string(),
            source: SourceKind::Live,
            api_base_url: "https://fapi.binance.com".to_string(),
            quote_asset: "USDT".to_string(),
            symbols: Vec::new(),
            symbol_limit: 50,
            symbol_offset: 0,
            liquidity_floor_usd: 1e8,
            chunk_size: 10,
            poll_interval: Duration::from_secs(30),
            timeframes: vec![Timeframe::M5],
            rate: RateSettings::default(),
            z_score_window: 100,
            market_cap_multiplier: 40.0,
            alert_threshold: 0.66,
            instrument_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let symbols = get(ENV_SYMBOLS)
            .map(|raw| parse_symbols(&raw))
            .unwrap_or_default();

        let timeframes = match get(ENV_TIMEFRAMES) {
            Some(raw) => {
                let parsed = parse_timeframes(&raw);
                if parsed.is_empty() {
                    warn!("{} has no valid timeframes ({}), using defaults", ENV_TIMEFRAMES, raw);
                    defaults.timeframes.clone()
                } else {
                    parsed
                }
            }
            None => defaults.timeframes.clone(),
        };

        let source = match get(ENV_METRIC_SOURCE) {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("{}, using live source", e);
                SourceKind::Live
            }),
            None => defaults.source,
        };

        let mut backoff_floor_secs =
            parse_non_negative(&get, ENV_BACKOFF_FLOOR, defaults.rate.backoff_floor_secs);
        let mut backoff_ceiling_secs =
            parse_non_negative(&get, ENV_BACKOFF_CEILING, defaults.rate.backoff_ceiling_secs);
        if backoff_ceiling_secs < backoff_floor_secs {
            warn!(
                "{} ({}) is below {} ({}), using default backoff bounds",
                ENV_BACKOFF_CEILING, backoff_ceiling_secs, ENV_BACKOFF_FLOOR, backoff_floor_secs
            );
            backoff_floor_secs = defaults.rate.backoff_floor_secs;
            backoff_ceiling_secs = defaults.rate.backoff_ceiling_secs;
        }

        let rate = RateSettings {
            max_concurrent: parse_or(&get, ENV_MAX_CONCURRENT, defaults.rate.max_concurrent).max(1),
            backoff_floor_secs,
            backoff_ceiling_secs,
            max_retries: parse_or(&get, ENV_MAX_RETRIES, defaults.rate.max_retries),
            request_timeout: Duration::from_secs(parse_or(
                &get,
                ENV_REQUEST_TIMEOUT,
                defaults.rate.request_timeout.as_secs(),
            )),
        };

        Self {
            database_url: get(ENV_DATABASE_URL),
            bind_addr: get(ENV_BIND_ADDR).unwrap_or(defaults.bind_addr),
            source,
            api_base_url: get(ENV_API_BASE_URL)
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base_url),
            quote_asset: get(ENV_QUOTE_ASSET)
                .map(|q| q.trim().to_uppercase())
                .unwrap_or(defaults.quote_asset),
            symbols,
            symbol_limit: parse_or(&get, ENV_SYMBOL_LIMIT, defaults.symbol_limit),
            symbol_offset: parse_or(&get, ENV_SYMBOL_OFFSET, defaults.symbol_offset),
            liquidity_floor_usd: parse_non_negative(
                &get,
                ENV_LIQUIDITY_FLOOR,
                defaults.liquidity_floor_usd,
            ),
            chunk_size: parse_or(&get, ENV_CHUNK_SIZE, defaults.chunk_size).max(1),
            poll_interval: Duration::from_secs(
                parse_or(&get, ENV_POLL_INTERVAL, defaults.poll_interval.as_secs()).max(1),
            ),
            timeframes,
            rate,
            z_score_window: parse_or(&get, ENV_Z_SCORE_WINDOW, defaults.z_score_window).max(2),
            market_cap_multiplier: parse_non_negative(
                &get,
                ENV_MARKET_CAP_MULTIPLIER,
                defaults.market_cap_multiplier,
            ),
            alert_threshold: parse_non_negative(&get, ENV_ALERT_THRESHOLD, defaults.alert_threshold),
            instrument_cache_ttl: Duration::from_secs(parse_or(
                &get,
                ENV_INSTRUMENT_CACHE_TTL,
                defaults.instrument_cache_ttl.as_secs(),
            )),
        }
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Debug,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid value for {}: '{}', using default {:?}", key, raw, default);
            default
        }),
        None => default,
    }
}

/// Like `parse_or`, but NaN, infinities and negative numbers also fall back
fn parse_non_negative<G>(get: &G, key: &str, default: f64) -> f64
where
    G: Fn(&str) -> Option<String>,
{
    let value = parse_or(get, key, default);
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        warn!("{} must be a finite, non-negative number, got {}, using default {}", key, value, default);
        default
    }
}

/// "btcusdt, ETHUSDT,,solusdt" -> ["BTCUSDT", "ETHUSDT", "SOLUSDT"]
fn parse_symbols(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for s in raw.split(',').map(|s| s.trim().to_uppercase()) {
        if !s.is_empty() && !out.contains(&s) {
            out.push(s);
        }
    }
    out
}

fn parse_timeframes(raw: &str) -> Vec<Timeframe> {
    let mut out: Vec<Timeframe> = Vec::new();
    for part in raw.split(',').filter(|s| !s.trim().is_empty()) {
        match part.parse::<Timeframe>() {
            Ok(tf) if !out.contains(&tf) => out.push(tf),
            Ok(_) => {}
            Err(e) => warn!("{}", e),
        }
    }
    out
}
