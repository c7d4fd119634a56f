use std::sync::Arc;

use axum::{extract::Extension, Json};

use crate::app::dto::HealthResponse;
use crate::app::state::AppState;

pub async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<HealthResponse> {
    let async_ingestion = state.async_ingestion_enabled();
    Json(HealthResponse {
        status: if async_ingestion { "ok" } else { "degraded" },
        async_ingestion,
    })
}
