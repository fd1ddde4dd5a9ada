//! Olimpiada web server and REST API.
//!
//! Provides an Axum-based HTTP server with:
//! - Health, status and session endpoints
//! - Cycle (gestión) initialization and carry-over
//! - Phase schedule and permission matrix management
//! - Sub-phase tracks and progress
//! - Audit log API
//! - WebSocket endpoint for live phase and sub-phase updates
//! - Password sessions carrying the user's roles

pub mod api;
pub mod ws;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::Router;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use olimpiada_core::config::AppConfig;
use olimpiada_core::Orchestrator;

/// A logged-in user.
#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub roles: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub config: AppConfig,
    /// Broadcast channel for live WebSocket updates.
    pub ws_broadcast: broadcast::Sender<String>,
    /// Active sessions keyed by bearer token.
    pub sessions: RwLock<HashMap<String, Session>>,
}

impl AppState {
    pub fn new(config: AppConfig, orchestrator: Arc<Orchestrator>) -> Self {
        let (ws_tx, _) = broadcast::channel(256);
        Self {
            orchestrator,
            config,
            ws_broadcast: ws_tx,
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

/// Every API route plus the WebSocket endpoint, without transport layers.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(api::status::routes())
        .merge(api::auth::routes())
        .merge(api::session::routes())
        .merge(api::gestion::routes())
        .merge(api::phases::routes())
        .merge(api::permissions::routes())
        .merge(api::access::routes())
        .merge(api::catalog::routes())
        .merge(api::subphases::routes())
        .merge(api::audit::routes())
        .merge(ws::routes())
        .with_state(state)
}

/// The web server.
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: AppConfig, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            state: Arc::new(AppState::new(config, orchestrator)),
        }
    }

    /// Get a clone of the broadcast sender for pushing events.
    pub fn broadcast_sender(&self) -> broadcast::Sender<String> {
        self.state.ws_broadcast.clone()
    }

    /// Start the web server, listening on the given address.
    pub async fn start(self, listen_addr: &str) -> anyhow::Result<()> {
        let addr: SocketAddr = listen_addr.parse()?;

        let cors = CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

        let app = router(self.state)
            .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
            .layer(TraceLayer::new_for_http())
            .layer(cors);

        info!(addr = %addr, "starting web server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
