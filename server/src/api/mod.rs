mod health;
mod sessions;

use std::sync::Arc;

use axum::Router;

use crate::AppState;

/// Build the API router
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/nfc/sessions", sessions::router())
        .merge(health::router())
}
