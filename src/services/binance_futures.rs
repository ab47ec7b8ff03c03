//! Binance USDⓈ-M futures REST client.
//!
//! Raw payloads are deserialized into private `Raw*` structs and converted to
//! the typed models in `models::exchange` immediately; string-formatted numbers
//! never leave this module.

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::MetricsError;
use crate::models::exchange::{
    Candle, ContractKind, Instrument, LongShortRatio, LongShortScope, OrderBookDepth, Ticker,
};
use crate::models::metric::{ExchangeId, Timeframe};
use crate::services::metric_source::MetricSource;

const EXCHANGE_INFO_KEY: &str = "exchange_info";

#[derive(Debug, Deserialize)]
struct RawExchangeInfo {
    symbols: Vec<RawSymbol>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSymbol {
    symbol: String,
    #[serde(default)]
    contract_type: String,
    status: String,
    #[serde(default)]
    quote_asset: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTicker {
    symbol: String,
    last_price: String,
    price_change_percent: String,
    quote_volume: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOpenInterest {
    open_interest: String,
}

#[derive(Debug, Deserialize)]
struct RawDepth {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPremiumIndex {
    last_funding_rate: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLongShort {
    long_short_ratio: String,
    long_account: String,
    short_account: String,
}

/// Static part of the instrument list; cached between cycles.
#[derive(Debug, Clone)]
struct InstrumentMeta {
    symbol: String,
    contract: ContractKind,
    active: bool,
    quote_asset: String,
}

#[derive(Clone)]
pub struct BinanceFuturesSource {
    client: Client,
    base_url: String,
    instruments: Arc<Cache<&'static str, Arc<Vec<InstrumentMeta>>>>,
}

impl BinanceFuturesSource {
    pub fn new(
        base_url: String,
        request_timeout: Duration,
        instrument_cache_ttl: Duration,
    ) -> Result<Self, MetricsError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .gzip(true)
            .build()?;

        let instruments = Cache::builder()
            .max_capacity(1)
            .time_to_live(instrument_cache_ttl)
            .build();

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            instruments: Arc::new(instruments),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, MetricsError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self.client.get(&url).query(query).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MetricsError::from_http_status(
                ExchangeId::Binance,
                status.as_u16(),
                &body,
            ));
        }

        Ok(response.json::<T>().await?)
    }

    async fn instrument_meta(&self) -> Result<Arc<Vec<InstrumentMeta>>, MetricsError> {
        if let Some(cached) = self.instruments.get(EXCHANGE_INFO_KEY).await {
            tracing::debug!("Instrument metadata cache hit ({} symbols)", cached.len());
            return Ok(cached);
        }

        let info: RawExchangeInfo = self.get_json("/fapi/v1/exchangeInfo", &[]).await?;
        let meta = Arc::new(parse_exchange_info(info));

        tracing::info!("Loaded {} Binance futures instruments", meta.len());
        self.instruments.insert(EXCHANGE_INFO_KEY, meta.clone()).await;

        Ok(meta)
    }
}

#[async_trait]
impl MetricSource for BinanceFuturesSource {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Binance
    }

    async fn fetch_active_instruments(&self) -> Result<Vec<Instrument>, MetricsError> {
        let meta = self.instrument_meta().await?;
        let tickers: Vec<RawTicker> = self.get_json("/fapi/v1/ticker/24hr", &[]).await?;

        let mut volumes = HashMap::with_capacity(tickers.len());
        for raw in tickers {
            // Delisted symbols can carry garbage; they are filtered by status anyway
            if let Ok(ticker) = parse_ticker(raw) {
                volumes.insert(ticker.symbol, ticker.quote_volume_24h);
            }
        }

        Ok(merge_instruments(&meta, &volumes))
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, MetricsError> {
        let raw: RawTicker = self
            .get_json("/fapi/v1/ticker/24hr", &[("symbol", symbol.to_string())])
            .await?;
        parse_ticker(raw)
    }

    async fn fetch_open_interest(&self, symbol: &str) -> Result<f64, MetricsError> {
        let raw: RawOpenInterest = self
            .get_json("/fapi/v1/openInterest", &[("symbol", symbol.to_string())])
            .await?;
        parse_number("openInterest", &raw.open_interest)
    }

    async fn fetch_order_book_depth(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<OrderBookDepth, MetricsError> {
        let raw: RawDepth = self
            .get_json(
                "/fapi/v1/depth",
                &[("symbol", symbol.to_string()), ("limit", limit.to_string())],
            )
            .await?;
        parse_depth(raw)
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, MetricsError> {
        let raw: Vec<Vec<serde_json::Value>> = self
            .get_json(
                "/fapi/v1/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.as_str().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        parse_klines(&raw)
    }

    async fn fetch_funding_rate(&self, symbol: &str) -> Result<f64, MetricsError> {
        let raw: RawPremiumIndex = self
            .get_json("/fapi/v1/premiumIndex", &[("symbol", symbol.to_string())])
            .await?;
        parse_number("lastFundingRate", &raw.last_funding_rate)
    }

    async fn fetch_long_short_ratio(
        &self,
        symbol: &str,
        period: Timeframe,
        scope: LongShortScope,
    ) -> Result<LongShortRatio, MetricsError> {
        let path = match scope {
            LongShortScope::GlobalAccount => "/futures/data/globalLongShortAccountRatio",
            LongShortScope::TopTraderAccount => "/futures/data/topLongShortAccountRatio",
        };

        let raw: Vec<RawLongShort> = self
            .get_json(
                path,
                &[
                    ("symbol", symbol.to_string()),
                    ("period", period.as_str().to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        let latest = raw.into_iter().last().ok_or_else(|| MetricsError::DataUnavailable {
            symbol: symbol.to_string(),
            field: scope.field_name(),
            reason: "empty response".to_string(),
        })?;
        parse_long_short(latest)
    }
}

fn parse_number(field: &str, raw: &str) -> Result<f64, MetricsError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| MetricsError::InvalidResponse(format!("{} is not a number: '{}'", field, raw)))?;

    if !value.is_finite() {
        return Err(MetricsError::InvalidResponse(format!(
            "{} is not finite: '{}'",
            field, raw
        )));
    }

    Ok(value)
}

fn parse_exchange_info(info: RawExchangeInfo) -> Vec<InstrumentMeta> {
    info.symbols
        .into_iter()
        .map(|s| InstrumentMeta {
            contract: match s.contract_type.as_str() {
                "PERPETUAL" => ContractKind::Perpetual,
                "CURRENT_QUARTER" | "NEXT_QUARTER" | "CURRENT_MONTH" | "NEXT_MONTH" => {
                    ContractKind::Delivery
                }
                _ => ContractKind::Other,
            },
            active: s.status == "TRADING",
            quote_asset: s.quote_asset.to_uppercase(),
            symbol: s.symbol,
        })
        .collect()
}

/// Join cached metadata with fresh 24h volumes, keeping exchangeInfo order.
fn merge_instruments(meta: &[InstrumentMeta], volumes: &HashMap<String, f64>) -> Vec<Instrument> {
    meta.iter()
        .map(|m| Instrument {
            symbol: m.symbol.clone(),
            contract: m.contract,
            active: m.active,
            quote_asset: m.quote_asset.clone(),
            quote_volume_24h: volumes.get(&m.symbol).copied().unwrap_or(0.0),
        })
        .collect()
}

fn parse_ticker(raw: RawTicker) -> Result<Ticker, MetricsError> {
    Ok(Ticker {
        last_price: parse_number("lastPrice", &raw.last_price)?,
        quote_volume_24h: parse_number("quoteVolume", &raw.quote_volume)?,
        price_change_pct_24h: parse_number("priceChangePercent", &raw.price_change_percent)?,
        symbol: raw.symbol,
    })
}

fn parse_levels(side: &str, raw: &[[String; 2]]) -> Result<Vec<(f64, f64)>, MetricsError> {
    raw.iter()
        .map(|[price, qty]| -> Result<(f64, f64), MetricsError> {
            Ok((parse_number(side, price)?, parse_number(side, qty)?))
        })
        .collect()
}

fn parse_depth(raw: RawDepth) -> Result<OrderBookDepth, MetricsError> {
    Ok(OrderBookDepth {
        bids: parse_levels("bids", &raw.bids)?,
        asks: parse_levels("asks", &raw.asks)?,
    })
}

/// Kline rows are mixed arrays:
/// `[openTime, "open", "high", "low", "close", "volume", closeTime, ...]`
fn parse_klines(raw: &[Vec<serde_json::Value>]) -> Result<Vec<Candle>, MetricsError> {
    raw.iter()
        .map(|row| -> Result<Candle, MetricsError> {
            if row.len() < 6 {
                return Err(MetricsError::InvalidResponse(format!(
                    "kline has {} fields, expected at least 6",
                    row.len()
                )));
            }

            let open_time_ms = row[0].as_i64().ok_or_else(|| {
                MetricsError::InvalidResponse(format!("kline open time is not an integer: {}", row[0]))
            })?;

            let field = |idx: usize, name: &str| -> Result<f64, MetricsError> {
                match &row[idx] {
                    serde_json::Value::String(s) => parse_number(name, s),
                    serde_json::Value::Number(n) => n
                        .as_f64()
                        .ok_or_else(|| MetricsError::InvalidResponse(format!("{} out of range", name))),
                    other => Err(MetricsError::InvalidResponse(format!(
                        "{} has unexpected type: {}",
                        name, other
                    ))),
                }
            };

            Ok(Candle {
                open_time_ms,
                open: field(1, "open")?,
                high: field(2, "high")?,
                low: field(3, "low")?,
                close: field(4, "close")?,
                volume: field(5, "volume")?,
            })
        })
        .collect()
}

fn parse_long_short(raw: RawLongShort) -> Result<LongShortRatio, MetricsError> {
    Ok(LongShortRatio {
        ratio: parse_number("longShortRatio", &raw.long_short_ratio)?,
        long_pct: parse_number("longAccount", &raw.long_account)? * 100.0,
        short_pct: parse_number("shortAccount", &raw.short_account)? * 100.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exchange_info_classifies_contracts() {
        let info: RawExchangeInfo = serde_json::from_str(
            r#"{"timezone":"UTC","symbols":[
                {"symbol":"BTCUSDT","pair":"BTCUSDT","contractType":"PERPETUAL","status":"TRADING","quoteAsset":"USDT"},
                {"symbol":"BTCUSDT_251226","pair":"BTCUSDT","contractType":"CURRENT_QUARTER","status":"TRADING","quoteAsset":"USDT"},
                {"symbol":"LUNAUSDT","pair":"LUNAUSDT","contractType":"PERPETUAL","status":"SETTLING","quoteAsset":"USDT"},
                {"symbol":"ODDUSDT","pair":"ODDUSDT","contractType":"","status":"TRADING","quoteAsset":"USDT"}
            ]}"#,
        )
        .unwrap();

        let meta = parse_exchange_info(info);
        assert_eq!(meta.len(), 4);
        assert_eq!(meta[0].contract, ContractKind::Perpetual);
        assert!(meta[0].active);
        assert_eq!(meta[1].contract, ContractKind::Delivery);
        assert!(!meta[2].active);
        assert_eq!(meta[3].contract, ContractKind::Other);
        assert!(meta.iter().all(|m| m.quote_asset == "USDT"));
    }

    #[test]
    fn test_merge_instruments_defaults_missing_volume_to_zero() {
        let meta = vec![
            InstrumentMeta {
                symbol: "BTCUSDT".to_string(),
                contract: ContractKind::Perpetual,
                active: true,
                quote_asset: "USDT".to_string(),
            },
            InstrumentMeta {
                symbol: "NEWUSDT".to_string(),
                contract: ContractKind::Perpetual,
                active: true,
                quote_asset: "USDT".to_string(),
            },
        ];
        let volumes = HashMap::from([("BTCUSDT".to_string(), 9.5e9)]);

        let merged = merge_instruments(&meta, &volumes);
        assert_eq!(merged[0].quote_volume_24h, 9.5e9);
        assert_eq!(merged[1].quote_volume_24h, 0.0);
    }

    #[test]
    fn test_parse_ticker() {
        let raw: RawTicker = serde_json::from_str(
            r#"{"symbol":"BTCUSDT","priceChange":"-94.99","priceChangePercent":"-0.095",
                "weightedAvgPrice":"100100.1","lastPrice":"100000.50","lastQty":"0.01",
                "openPrice":"100095.49","highPrice":"101000","lowPrice":"99000",
                "volume":"150000","quoteVolume":"15000000000.75","openTime":0,"closeTime":0,
                "firstId":1,"lastId":2,"count":3}"#,
        )
        .unwrap();

        let ticker = parse_ticker(raw).unwrap();
        assert_eq!(ticker.symbol, "BTCUSDT");
        assert_eq!(ticker.last_price, 100000.5);
        assert_eq!(ticker.quote_volume_24h, 15000000000.75);
        assert_eq!(ticker.price_change_pct_24h, -0.095);
    }

    #[test]
    fn test_parse_number_rejects_formatted_strings() {
        assert!(matches!(
            parse_number("lastPrice", "$1,234"),
            Err(MetricsError::InvalidResponse(_))
        ));
        assert!(parse_number("lastPrice", "NaN").is_err());
        assert_eq!(parse_number("lastPrice", " 12.5 ").unwrap(), 12.5);
    }

    #[test]
    fn test_parse_depth() {
        let raw: RawDepth = serde_json::from_str(
            r#"{"lastUpdateId":1,"E":1,"T":1,
                "bids":[["100.0","2.5"],["99.9","1.5"]],
                "asks":[["100.1","1.0"]]}"#,
        )
        .unwrap();

        let depth = parse_depth(raw).unwrap();
        assert_eq!(depth.bid_volume(5), 4.0);
        assert_eq!(depth.ask_volume(5), 1.0);
    }

    #[test]
    fn test_parse_klines_mixed_arrays() {
        let raw: Vec<Vec<serde_json::Value>> = serde_json::from_str(
            r#"[[1499040000000,"0.01634790","0.80000000","0.01575800","0.01577100","148976.11427815",
                 1499644799999,"2434.19055334",308,"1756.87402397","28.46694368","0"]]"#,
        )
        .unwrap();

        let candles = parse_klines(&raw).unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].open_time_ms, 1499040000000);
        assert_eq!(candles[0].close, 0.015771);
        assert_eq!(candles[0].volume, 148976.11427815);
    }

    #[test]
    fn test_parse_klines_rejects_short_rows() {
        let raw: Vec<Vec<serde_json::Value>> =
            serde_json::from_str(r#"[[1499040000000,"1.0","2.0"]]"#).unwrap();
        assert!(parse_klines(&raw).is_err());
    }

    #[test]
    fn test_parse_long_short_scales_account_shares() {
        let raw: RawLongShort = serde_json::from_str(
            r#"{"symbol":"BTCUSDT","longShortRatio":"1.8105","longAccount":"0.6442",
                "shortAccount":"0.3558","timestamp":"1583139600000"}"#,
        )
        .unwrap();

        let ratio = parse_long_short(raw).unwrap();
        assert_eq!(ratio.ratio, 1.8105);
        assert!((ratio.long_pct - 64.42).abs() < 1e-9);
        assert!((ratio.short_pct - 35.58).abs() < 1e-9);
    }
}
