mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::Semaphore;
use tower::ServiceExt;

use futuresboard_backend::models::metric::Timeframe;
use futuresboard_backend::services::metric_store::MetricStore;

use crate::common::{ScriptedSource, body_json, stored_row, test_pipeline, test_router, ts};

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn default_source() -> Arc<ScriptedSource> {
    Arc::new(ScriptedSource::new(&[
        ("BTCUSDT", 65_000.0, 9e9, 80_000.0),
        ("ETHUSDT", 3_000.0, 5e9, 1_200_000.0),
    ]))
}

#[tokio::test]
async fn test_health_before_first_cycle() {
    let (pipeline, _) = test_pipeline(default_source());
    let app = test_router(pipeline);

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "starting");
    assert!(json["last_cycle_timestamp"].is_null());
    assert_eq!(json["symbols_loaded"], 0);
}

#[tokio::test]
async fn test_metrics_page_ordered_by_volume() {
    let (pipeline, store) = test_pipeline(default_source());
    for (symbol, volume) in [("BTC", 9e9), ("ETH", 5e9), ("SOL", 2e9), ("XRP", 1e9)] {
        store
            .upsert(&stored_row(symbol, Timeframe::M5, ts(5), volume, Some(1.0), None, 0.0))
            .await
            .unwrap();
    }
    // Older BTC row must not show up in the latest page
    store
        .upsert(&stored_row("BTC", Timeframe::M5, ts(0), 1.0, Some(1.0), None, 0.0))
        .await
        .unwrap();
    let app = test_router(pipeline);

    let response = app
        .oneshot(get("/api/metrics?tf=5m&limit=2&offset=1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["total_count"], 4);
    assert_eq!(json["limit"], 2);
    assert_eq!(json["offset"], 1);
    assert_eq!(json["timeframe"], "5m");

    let data = json["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["symbol"], "ETH");
    assert_eq!(data[1]["symbol"], "SOL");
}

#[tokio::test]
async fn test_metrics_limit_is_clamped() {
    let (pipeline, _) = test_pipeline(default_source());
    let app = test_router(pipeline);

    let response = app.oneshot(get("/api/metrics?limit=10000")).await.unwrap();
    let json = body_json(response).await;
    assert_eq!(json["limit"], 500);
    assert_eq!(json["timeframe"], "5m");
    assert_eq!(json["total_count"], 0);
}

#[tokio::test]
async fn test_huge_offset_returns_empty_page() {
    let (pipeline, store) = test_pipeline(default_source());
    store
        .upsert(&stored_row("BTC", Timeframe::M5, ts(5), 9e9, Some(1.0), None, 0.0))
        .await
        .unwrap();
    let app = test_router(pipeline);

    let response = app
        .oneshot(get("/api/metrics?offset=18446744073709551615"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["offset"], i64::MAX);
    assert_eq!(json["total_count"], 1);
    assert!(json["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_timeframe_is_bad_request() {
    let (pipeline, _) = test_pipeline(default_source());
    let app = test_router(pipeline);

    let response = app.oneshot(get("/api/metrics?tf=2h")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("2h"));
}

#[tokio::test]
async fn test_history_is_ascending_and_accepts_exchange_symbol() {
    let (pipeline, store) = test_pipeline(default_source());
    for minute in [10, 0, 5] {
        store
            .upsert(&stored_row("BTC", Timeframe::M5, ts(minute), 1e9, Some(1.0), None, 0.0))
            .await
            .unwrap();
    }
    let app = test_router(pipeline);

    let response = app
        .clone()
        .oneshot(get("/api/metrics/BTCUSDT/history?tf=5m&limit=2"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["symbol"], "BTC");
    let data = json["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["timestamp"], serde_json::to_value(ts(5)).unwrap());
    assert_eq!(data[1]["timestamp"], serde_json::to_value(ts(10)).unwrap());

    let response = app.oneshot(get("/api/metrics/DOGE/history")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_confluence_sorted_by_score() {
    let (pipeline, store) = test_pipeline(default_source());
    store
        .upsert(&stored_row("BTC", Timeframe::H1, ts(0), 9e9, Some(1.0), Some(0.5), 0.0))
        .await
        .unwrap();
    store
        .upsert(&stored_row("ETH", Timeframe::H1, ts(0), 5e9, Some(2.1), Some(-3.1), 2.6))
        .await
        .unwrap();
    let app = test_router(pipeline);

    let response = app.oneshot(get("/api/confluence?tf=1h")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["timeframe"], "1h");
    let data = json["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["symbol"], "ETH");
    assert_eq!(data[0]["score"], 1.0);
    assert_eq!(data[0]["bias"], "long");
    assert_eq!(
        data[0]["contributing_factors"],
        serde_json::json!(["z_score_extreme", "long_short_crowded", "orderbook_imbalance"])
    );
    assert_eq!(data[1]["symbol"], "BTC");
    assert_eq!(data[1]["score"], 0.0);
    assert_eq!(data[1]["bias"], "neutral");
}

#[tokio::test]
async fn test_refresh_conflicts_while_in_flight() {
    let gate = Arc::new(Semaphore::new(0));
    let mut source = ScriptedSource::new(&[("BTCUSDT", 65_000.0, 9e9, 80_000.0)]);
    source.gate = Some(gate.clone());
    let (pipeline, store) = test_pipeline(Arc::new(source));
    let mut events = pipeline.subscribe();
    let app = test_router(pipeline.clone());

    let response = app.clone().oneshot(post("/api/metrics/refresh")).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["status"], "started");

    let response = app.oneshot(post("/api/metrics/refresh")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["status"], "in_flight");

    gate.add_permits(1);
    let event = events.recv().await.unwrap();
    assert_eq!(event.rows.len(), 1);
    assert_eq!(store.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_health_reports_unreachable_exchange() {
    let source = default_source();
    source.down.store(true, Ordering::SeqCst);
    let (pipeline, _) = test_pipeline(source.clone());

    // Listing succeeds, every per-symbol call fails
    assert!(pipeline.try_run_cycle().await.unwrap().is_err());

    let app = test_router(pipeline);
    let json = body_json(app.oneshot(get("/health")).await.unwrap()).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["consecutive_failures"], 1);
    assert_eq!(json["symbols_requested"], 2);
    assert!(json["last_error"].as_str().unwrap().contains("no symbols could be fetched"));
}
