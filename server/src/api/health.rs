use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use chrono::Utc;
use serde_json::{Value, json};

use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

/// GET /api/health - Liveness plus session counters
async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let stats = state.sessions.stats().await;
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "sessions": stats,
    }))
}
