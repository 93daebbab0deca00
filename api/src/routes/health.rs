use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::AppState;
use crate::services::inference::ServiceHealth;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/v1/health", get(health))
}

/// GET /api/v1/health - 503 while the inference service is not healthy
async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let ai_service = state.inference.health().await;
    let (status, code) = match ai_service {
        ServiceHealth::Healthy => ("healthy", StatusCode::OK),
        _ => ("degraded", StatusCode::SERVICE_UNAVAILABLE),
    };

    (
        code,
        Json(json!({
            "status": status,
            "timestamp": Utc::now(),
            "services": {
                "api": "healthy",
                "aiService": ai_service,
                "jobStore": state.store.backend(),
                "queue": state.queue.backend(),
            },
        })),
    )
}
