use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

use crate::AppState;
use crate::models::api::{
    ConfluenceQuery, ConfluenceResponse, DEFAULT_HISTORY_LIMIT, DEFAULT_PAGE_LIMIT, ErrorResponse,
    HistoryQuery, HistoryResponse, MAX_HISTORY_LIMIT, MAX_PAGE_LIMIT, MetricsPageResponse,
    MetricsQuery, RefreshResponse,
};
use crate::models::metric::{MetricKey, Timeframe, neutral_symbol};
use crate::services::confluence;
use crate::services::metric_store::MetricStore;
use crate::services::pipeline::TriggerOutcome;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn parse_timeframe(tf: Option<&str>) -> Result<Timeframe, ApiError> {
    match tf {
        None => Ok(Timeframe::M5),
        Some(raw) => raw.parse().map_err(|e: String| {
            (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: e }))
        }),
    }
}

fn store_error(e: impl std::fmt::Display) -> ApiError {
    tracing::error!("Metric store query failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: format!("Database error: {}", e),
        }),
    )
}

/// GET /api/metrics - latest row per symbol, by 24h volume
pub async fn get_metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<MetricsPageResponse>, ApiError> {
    let timeframe = parse_timeframe(query.tf.as_deref())?;
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT);
    // stores bind offsets as signed 64-bit
    let offset = query.offset.unwrap_or(0).min(i64::MAX as u64);

    let (data, total_count) = state
        .store
        .query_latest_page(timeframe, limit, offset)
        .await
        .map_err(store_error)?;

    Ok(Json(MetricsPageResponse {
        data,
        total_count,
        limit,
        offset,
        timeframe,
    }))
}

/// GET /api/metrics/{symbol}/history - rows for one symbol, oldest first.
///
/// Accepts either the neutral ticker ("BTC") or the exchange symbol ("BTCUSDT").
pub async fn get_history(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let timeframe = parse_timeframe(query.tf.as_deref())?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(MAX_HISTORY_LIMIT);
    let key = MetricKey::new(neutral_symbol(&symbol), timeframe);

    let data = state
        .store
        .query_history(&key, limit)
        .await
        .map_err(store_error)?;

    Ok(Json(HistoryResponse {
        symbol: key.symbol,
        timeframe,
        data,
    }))
}

/// GET /api/confluence - confluence result for every symbol's latest row
pub async fn get_confluence(
    State(state): State<AppState>,
    Query(query): Query<ConfluenceQuery>,
) -> Result<Json<ConfluenceResponse>, ApiError> {
    let timeframe = parse_timeframe(query.tf.as_deref())?;

    let (rows, _) = state
        .store
        .query_latest_page(timeframe, MAX_PAGE_LIMIT, 0)
        .await
        .map_err(store_error)?;

    Ok(Json(ConfluenceResponse {
        timeframe,
        data: confluence::alerts(&rows, 0.0),
    }))
}

/// POST /api/metrics/refresh - start a cycle now
pub async fn refresh_metrics(State(state): State<AppState>) -> (StatusCode, Json<RefreshResponse>) {
    match state.pipeline.trigger() {
        TriggerOutcome::Started => {
            tracing::info!("On-demand metrics cycle started");
            (
                StatusCode::ACCEPTED,
                Json(RefreshResponse {
                    status: "started".to_string(),
                }),
            )
        }
        TriggerOutcome::InFlight => (
            StatusCode::CONFLICT,
            Json(RefreshResponse {
                status: "in_flight".to_string(),
            }),
        ),
    }
}
