//! Coordinator server: state, router assembly, health and readiness.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use basin_core::{
    JobStore, MemoryBackend, MemoryBus, MemoryJobStore, MessageBus, Result, StorageBackend,
};

use crate::config::Config;
use crate::routes;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Service readiness status.
    pub ready: bool,
    /// Optional message about readiness state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Shared application state for all request handlers.
///
/// Wiring is explicit: the composition root constructs every collaborator and
/// hands them in; handlers never reach for ambient context.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Staging bucket backend for raw uploads.
    pub uploads: Arc<dyn StorageBackend>,
    /// Warehouse bucket backend for result downloads.
    pub warehouse: Arc<dyn StorageBackend>,
    /// Job record store.
    pub jobs: Arc<dyn JobStore>,
    /// Work queue.
    pub bus: Arc<dyn MessageBus>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Creates application state from explicit collaborators.
    #[must_use]
    pub fn new(
        config: Config,
        uploads: Arc<dyn StorageBackend>,
        warehouse: Arc<dyn StorageBackend>,
        jobs: Arc<dyn JobStore>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            config,
            uploads,
            warehouse,
            jobs,
            bus,
        }
    }

    /// Creates state with in-memory collaborators (for testing).
    #[must_use]
    pub fn with_memory_backends(config: Config) -> Self {
        let queue_name = config.queue.queue_name.clone();
        let ttl = config.job_ttl_seconds;
        Self::new(
            config,
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryJobStore::new(ttl)),
            Arc::new(MemoryBus::new(queue_name)),
        )
    }
}

/// The coordinator HTTP server.
#[derive(Debug)]
pub struct Server {
    state: Arc<AppState>,
}

impl Server {
    /// Creates a server over the given state.
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Assembles the full router, including health endpoints.
    #[must_use]
    pub fn router(&self) -> Router {
        let api = Router::new()
            .merge(routes::upload::routes(self.state.config.file_max_size))
            .merge(routes::jobs::routes())
            .merge(routes::query::routes())
            .merge(routes::schema::routes());

        Router::new()
            .route("/health", get(health))
            .route("/ready", get(ready))
            .nest("/api/v1", api)
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .with_state(Arc::clone(&self.state))
    }

    /// Binds the configured port and serves until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error when the listener cannot bind or the server fails.
    pub async fn serve(self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.api_port));
        let router = self.router();

        tracing::info!(%addr, "coordinator listening");
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| basin_core::Error::Internal {
                message: format!("failed to bind {addr}: {e}"),
            })?;
        axum::serve(listener, router)
            .await
            .map_err(|e| basin_core::Error::Internal {
                message: format!("server error: {e}"),
            })
    }
}

/// Health check endpoint handler.
///
/// Shallow: reports the process is alive without touching dependencies.
async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness check endpoint handler.
///
/// A `HEAD` on a missing key is enough to validate credentials and the
/// network path without listing buckets.
async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let check_key = "__basin/ready-check";
    match state.uploads.head(check_key).await {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                message: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                message: Some(format!("object store unavailable: {e}")),
            }),
        ),
    }
}
