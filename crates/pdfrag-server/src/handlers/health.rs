use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    postgres: bool,
    redis: bool,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let postgres = state.db_pool.ping().await;
    let redis = state.cache.ping().await;

    // The catalog is authoritative; a dead cache only degrades.
    let (status, code) = if postgres {
        ("healthy", StatusCode::OK)
    } else {
        ("unhealthy", StatusCode::SERVICE_UNAVAILABLE)
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            postgres,
            redis,
        }),
    )
}
