use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState};
use super::auth::AuthClient;
use super::db::{BoardDb, DbHandle};
use super::gateway::{ChatGateway, DEFAULT_GATEWAY_URL, DEFAULT_MODEL, HttpGateway};
use super::store::SqliteTaskStore;
use super::ws;

/// Configuration for the board server.
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
    pub auth_url: String,
    pub public_key: String,
    pub gateway_url: String,
    /// Without a key the chat route answers 500 "not configured".
    pub gateway_key: Option<String>,
    pub model: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3141,
            db_path: PathBuf::from(".flowboard/board.db"),
            dev_mode: false,
            auth_url: String::new(),
            public_key: String::new(),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            gateway_key: None,
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

/// Build the full application router: REST and chat routes plus the change
/// socket.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

/// Open the database, wire the collaborators and serve until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    if config.auth_url.is_empty() {
        anyhow::bail!("FLOWBOARD_AUTH_URL is not set; the board needs an auth service");
    }

    // Ensure parent directory exists for DB
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let db = BoardDb::new(&config.db_path).context("Failed to initialize board database")?;
    let gateway: Option<Arc<dyn ChatGateway>> = match &config.gateway_key {
        Some(key) => Some(Arc::new(HttpGateway::new(&config.gateway_url, key))),
        None => {
            tracing::warn!("AI_GATEWAY_API_KEY is not set; chat requests will fail");
            None
        }
    };

    let state = Arc::new(AppState {
        store: SqliteTaskStore::new(DbHandle::new(db)),
        auth: Arc::new(AuthClient::new(&config.auth_url, &config.public_key)),
        gateway,
        model: config.model.clone(),
    });

    let mut app = build_router(state).layer(TraceLayer::new_for_http());

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        db = %config.db_path.display(),
        model = %config.model,
        "FlowBoard running at http://{}",
        local_addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}
