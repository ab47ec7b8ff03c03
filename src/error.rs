//! Error taxonomy for the metrics pipeline.

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::models::metric::ExchangeId;

lazy_static! {
    /// Message/code patterns exchanges use to signal throttling.
    /// Binance: -1003 (too many requests), 418 (IP ban after ignoring 429s).
    static ref RATE_LIMIT_PATTERN: Regex =
        Regex::new(r"(?i)(-1003|\b429\b|\b418\b|too many requests|rate limit|request weight)")
            .expect("rate limit pattern is valid");
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricsError {
    /// Timeouts, connection resets. Retried with backoff.
    #[error("network error: {0}")]
    NetworkTransient(String),

    /// The exchange is throttling us. Backoff plus jitter is mandatory before any retry.
    #[error("rate limited by {exchange}: {message}")]
    RateLimited { exchange: ExchangeId, message: String },

    /// An optional field could not be retrieved; the field is degraded, not the row.
    #[error("{field} unavailable for {symbol}: {reason}")]
    DataUnavailable {
        symbol: String,
        field: &'static str,
        reason: String,
    },

    /// A required field failed after retries; the symbol is dropped for this cycle.
    #[error("failed to fetch {symbol}: {reason}")]
    SymbolFetchFailed { symbol: String, reason: String },

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// Non-success HTTP status that is not a throttling signal.
    #[error("exchange api error {status}: {message}")]
    Api { status: u16, message: String },

    /// Upstream payload did not match the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Every symbol in the cycle failed.
    #[error("no symbols could be fetched from {exchange} ({attempted} attempted)")]
    ExchangeUnreachable { exchange: ExchangeId, attempted: usize },
}

impl MetricsError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MetricsError::NetworkTransient(_) | MetricsError::RateLimited { .. }
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, MetricsError::RateLimited { .. })
    }

    /// Classify a non-success HTTP response. Throttling is recognised by status
    /// code or by the message/code pattern in the body.
    pub fn from_http_status(exchange: ExchangeId, status: u16, body: &str) -> Self {
        if status == 429 || status == 418 || RATE_LIMIT_PATTERN.is_match(body) {
            return MetricsError::RateLimited {
                exchange,
                message: format!("HTTP {}: {}", status, truncate(body, 200)),
            };
        }

        if status >= 500 {
            return MetricsError::NetworkTransient(format!(
                "HTTP {}: {}",
                status,
                truncate(body, 200)
            ));
        }

        MetricsError::Api {
            status,
            message: truncate(body, 200).to_string(),
        }
    }
}

impl From<reqwest::Error> for MetricsError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            MetricsError::InvalidResponse(e.to_string())
        } else {
            MetricsError::NetworkTransient(e.to_string())
        }
    }
}

impl From<sea_orm::DbErr> for MetricsError {
    fn from(e: sea_orm::DbErr) -> Self {
        MetricsError::PersistenceFailure(e.to_string())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_429_is_rate_limited() {
        let err = MetricsError::from_http_status(ExchangeId::Binance, 429, "");
        assert!(err.is_rate_limited());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_binance_weight_code_is_rate_limited() {
        let body = r#"{"code":-1003,"msg":"Too much request weight used; current limit is 2400 request weight per 1 MINUTE."}"#;
        let err = MetricsError::from_http_status(ExchangeId::Binance, 400, body);
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_bad_request_is_not_retryable() {
        let body = r#"{"code":-1121,"msg":"Invalid symbol."}"#;
        let err = MetricsError::from_http_status(ExchangeId::Binance, 400, body);
        assert!(matches!(err, MetricsError::Api { status: 400, .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_server_error_is_transient() {
        let err = MetricsError::from_http_status(ExchangeId::Binance, 503, "Service Unavailable");
        assert!(matches!(err, MetricsError::NetworkTransient(_)));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
