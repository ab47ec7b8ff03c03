// src/lib.rs

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use services::{metric_store::MetricStore, pipeline::MetricsPipeline};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MetricStore>,
    pub pipeline: Arc<MetricsPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<MetricsPipeline>) -> Self {
        Self {
            store: pipeline.store().clone(),
            pipeline,
        }
    }
}

pub mod entities;

pub mod services {
    pub mod stats;
    pub mod rate_controller;
    pub mod metric_source;
    pub mod binance_futures;
    pub mod synthetic_source;
    pub mod symbol_selector;
    pub mod metric_fetcher;
    pub mod batch_orchestrator;
    pub mod aggregator;
    pub mod metric_store;
    pub mod enrichment;
    pub mod confluence;
    pub mod health;
    pub mod pipeline;
}

pub mod handlers {
    pub mod health;
    pub mod metrics;
    pub mod metrics_ws;
}

pub mod config;
pub mod error;
pub mod jobs;
pub mod models;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::get_health))
        .route("/api/metrics", get(handlers::metrics::get_metrics))
        .route("/api/metrics/refresh", post(handlers::metrics::refresh_metrics))
        .route(
            "/api/metrics/{symbol}/history",
            get(handlers::metrics::get_history),
        )
        .route("/api/confluence", get(handlers::metrics::get_confluence))
        .route("/ws/metrics", get(handlers::metrics_ws::metrics_websocket))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
