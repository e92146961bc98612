mod api;
mod config;
mod error;
mod ndef;
mod nfc;
mod session;

use std::sync::Arc;

use axum::{Json, Router, http::StatusCode};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::nfc::transport::I2cTransport;
use crate::nfc::{MockPn532, Pn532, TagEmulator};
use crate::session::SessionManager;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub sessions: Arc<SessionManager>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nfc_bridge_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();

    // Pick the controller implementation
    let emulator: Box<dyn TagEmulator> = if config.use_mock_pn532 {
        tracing::warn!("USE_MOCK_PN532 set, running without hardware");
        Box::new(MockPn532::new())
    } else {
        let pn532_config = config.pn532();
        let transport = I2cTransport::open(pn532_config.i2c_bus, pn532_config.i2c_address)?;
        Box::new(Pn532::new(transport, pn532_config))
    };

    // Create shared state
    let sessions = Arc::new(SessionManager::new(config.session_timeout));
    let state = Arc::new(AppState {
        config: config.clone(),
        sessions: sessions.clone(),
    });

    // The worker owns the controller; the reaper sweeps finished sessions
    let worker = tokio::spawn(session::run_worker(
        sessions.clone(),
        emulator,
        config.tagging_timeout,
    ));
    tokio::spawn(session::run_reaper(sessions.clone()));

    // Start server
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    tracing::info!("NFC bridge listening on {}", config.bind_address());

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drop pending sessions; the worker finishes any in-flight tag wait
    // on its own clock and then exits
    sessions.shutdown().await;
    let _ = worker.await;

    Ok(())
}

/// Build the application router
fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", api::router())
        .fallback(not_found)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::NOT_FOUND, Json(json!({"error": "Not found"})))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
