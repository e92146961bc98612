use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_sessions).post(create_session))
        .route("/{session_id}", get(get_session))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Required; checked by hand so the error body stays ours.
    order_id: Option<String>,
    receipt_url: Option<String>,
}

/// POST /api/nfc/sessions - Queue a new emulation session
async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let order_id = match request.order_id {
        Some(order_id) if !order_id.is_empty() => order_id,
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "orderId is required"})),
            ));
        }
    };

    let receipt_url = match (&state.config.force_receipt_url, request.receipt_url) {
        // Debug override: pin every session to one configured URL.
        (Some(url), _) => url.clone(),
        (None, Some(url)) => url,
        // Fall back to the cloud redirect entry point for this order.
        (None, None) => format!("{}/r?order={}", state.config.redirect_base_url, order_id),
    };

    let session = state
        .sessions
        .create_session(order_id, receipt_url)
        .await
        .ok_or((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "Shutting down"})),
        ))?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "sessionId": session.id,
            "status": session.status,
            "expiresAt": session.expires_at.to_rfc3339(),
            "message": "NFC session created",
        })),
    ))
}

/// GET /api/nfc/sessions/:session_id - Poll one session
async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.sessions.get_session(&session_id).await {
        Some(session) => {
            let mut body = json!({
                "sessionId": session.id,
                "status": session.status,
                "expiresAt": session.expires_at.to_rfc3339(),
            });
            if let Some(completed_at) = session.completed_at {
                body["completedAt"] = Value::String(completed_at.to_rfc3339());
            }
            if let Some(error) = session.error {
                body["message"] = Value::String(error);
            }
            Ok(Json(body))
        }
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Session not found"})),
        )),
    }
}

/// GET /api/nfc/sessions - List all live sessions
async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Value> {
    let sessions = state.sessions.list_sessions().await;
    let entries: Vec<Value> = sessions
        .iter()
        .map(|session| {
            json!({
                "sessionId": session.id,
                "orderId": session.order_id,
                "status": session.status,
                "createdAt": session.created_at.to_rfc3339(),
                "expiresAt": session.expires_at.to_rfc3339(),
            })
        })
        .collect();
    Json(json!({"total": entries.len(), "sessions": entries}))
}
