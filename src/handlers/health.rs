use axum::{Json, extract::State};

use crate::AppState;
use crate::models::api::HealthResponse;

/// GET /health
pub async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(state.pipeline.health().snapshot())
}
