use sea_orm::Database;
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use futuresboard_backend::config::{Config, SourceKind};
use futuresboard_backend::jobs::metrics_sync::start_metrics_sync_job;
use futuresboard_backend::services::binance_futures::BinanceFuturesSource;
use futuresboard_backend::services::metric_source::MetricSource;
use futuresboard_backend::services::metric_store::{
    DEFAULT_RETENTION, InMemoryMetricStore, MetricStore, SeaOrmMetricStore,
};
use futuresboard_backend::services::pipeline::MetricsPipeline;
use futuresboard_backend::services::synthetic_source::SyntheticSource;
use futuresboard_backend::{AppState, build_router};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,futuresboard_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::from_env());

    let store: Arc<dyn MetricStore> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let db = Database::connect(database_url.as_str())
                .await
                .expect("Failed to connect to database");

            tracing::info!("Running migrations...");
            migration::Migrator::up(&db, None)
                .await
                .expect("Failed to run migrations");

            Arc::new(SeaOrmMetricStore::new(db))
        }
        None => {
            let retention = config.z_score_window.max(DEFAULT_RETENTION);
            tracing::warn!(
                "DATABASE_URL not set, keeping the last {} rows per series in memory",
                retention
            );
            Arc::new(InMemoryMetricStore::with_retention(retention))
        }
    };

    let source: Arc<dyn MetricSource> = match config.source {
        SourceKind::Live => Arc::new(
            BinanceFuturesSource::new(
                config.api_base_url.clone(),
                config.rate.request_timeout,
                config.instrument_cache_ttl,
            )
            .expect("Failed to build exchange client"),
        ),
        SourceKind::Synthetic => {
            tracing::warn!("Using synthetic metric source");
            Arc::new(SyntheticSource::new())
        }
    };

    let pipeline = Arc::new(MetricsPipeline::new(config.clone(), source, store));
    start_metrics_sync_job(pipeline.clone()).await;

    let app = build_router(AppState::new(pipeline));

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind listener");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
