//! Web server module: local status API.

mod handlers;

pub use handlers::*;

use crate::collector::CollectorClient;
use crate::db::Store;
use crate::scheduler::Scheduler;
use crate::session::SessionStore;
use crate::settings::SettingsHandle;
use crate::status::StatusBoard;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub settings: SettingsHandle,
    pub sessions: SessionStore,
    pub collector: CollectorClient,
    pub scheduler: Scheduler,
    pub status: StatusBoard,
}

/// Build the router with all routes.
pub fn routes(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/status", get(handlers::handle_status))
        .route("/api/config", get(handlers::handle_config))
        .route("/api/outbox", get(handlers::handle_outbox))
        .route("/api/session/login", post(handlers::handle_login))
        .route("/api/session/logout", post(handlers::handle_logout))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(64 * 1024))
        .with_state(state)
}

/// Status API server.
pub struct Server {
    port: u16,
    state: AppState,
}

impl Server {
    pub fn new(port: u16, state: AppState) -> Self {
        Self { port, state }
    }

    /// Serve until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let router = routes(self.state.clone());

        tracing::info!("Status API listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
