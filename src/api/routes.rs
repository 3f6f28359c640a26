//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tokio::sync::watch;

use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::persist::Persister;
use crate::store::{ProgressEvent, TaskStore};
use crate::sweep;

use super::auth;
use super::types::*;
use super::watch as watch_api;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// Single source of truth for task state
    pub store: Arc<TaskStore>,
    /// Fan-out of snapshots to connected observers
    pub broadcaster: Arc<Broadcaster>,
    /// Snapshot persistence, when a storage path is configured
    pub persist: Option<Arc<Persister>>,
}

impl AppState {
    /// Build the state, restoring any persisted tasks.
    pub async fn new(config: Config) -> Arc<Self> {
        let store = Arc::new(TaskStore::new());
        let persist = config
            .storage_path
            .clone()
            .map(|path| Arc::new(Persister::new(path)));

        if let Some(persister) = &persist {
            let restored = persister.load().await;
            if !restored.is_empty() {
                store.restore(restored).await;
            }
        }

        Arc::new(Self {
            config,
            store,
            broadcaster: Arc::new(Broadcaster::new()),
            persist,
        })
    }

    /// Persist and broadcast the current snapshot after a mutation.
    ///
    /// The disk write is fired off on its own task so the request path never
    /// waits on I/O; a failed save is logged and the server keeps serving
    /// from memory.
    pub async fn publish_state(&self) {
        let snapshot = self.store.snapshot().await;
        if let Some(persister) = &self.persist {
            let persister = Arc::clone(persister);
            let snapshot = snapshot.clone();
            tokio::spawn(async move {
                if let Err(e) = persister.save(&snapshot).await {
                    tracing::warn!("Failed to persist task snapshot: {}", e);
                }
            });
        }
        self.broadcaster.publish(Arc::new(snapshot)).await;
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/tasks", get(list_tasks).delete(bulk_delete_tasks))
        .route("/tasks/:task_id", delete(delete_task))
        .route("/progress", post(post_progress))
        .route("/ws", get(watch_api::watch_ws));

    if let Some(cors) = cors_layer(&state.config.allow_origins) {
        app = app.layer(cors);
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let state = AppState::new(config.clone()).await;

    // Independent lifecycle sweeper; told to stop once the server drains.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(sweep::run(
        Arc::clone(&state.store),
        Arc::clone(&state.broadcaster),
        state.persist.clone(),
        config.sweep_policy(),
        config.cleanup_interval,
        shutdown_rx,
    ));

    let app = router(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), sweeper).await;
    tracing::info!("Graceful shutdown complete");

    Ok(())
}

/// Wait for SIGINT/SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

fn cors_layer(allow_origins: &[String]) -> Option<CorsLayer> {
    if allow_origins.is_empty() {
        return None;
    }
    let origins: Vec<HeaderValue> = allow_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any),
    )
}

/// Health check endpoint. Unauthenticated, for liveness polling.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        tasks: state.store.len().await,
    })
}

/// Full-state snapshot query.
async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuthQuery>,
    headers: HeaderMap,
) -> Result<Json<TasksResponse>, (StatusCode, String)> {
    let candidates = [params.token, auth::extract_bearer(&headers)];
    auth::require_token(&state.config, &candidates)?;

    Ok(Json(TasksResponse {
        tasks: state.store.snapshot().await,
    }))
}

/// Ingest one progress event, then push the updated snapshot to observers.
async fn post_progress(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuthQuery>,
    headers: HeaderMap,
    Json(mut event): Json<ProgressEvent>,
) -> Result<Json<ProgressResponse>, (StatusCode, String)> {
    // Clients without header control may smuggle the token inside meta.
    let meta_token = event
        .meta
        .as_mut()
        .and_then(|meta| meta.remove("_token"))
        .and_then(|value| value.as_str().map(str::to_string));

    let candidates = [meta_token, params.token, auth::extract_bearer(&headers)];
    auth::require_token(&state.config, &candidates)?;

    let record = state
        .store
        .apply(event)
        .await
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    state.publish_state().await;

    Ok(Json(ProgressResponse { ok: true, task: record }))
}

/// Remove one task. Removing an unknown id is a no-op, not an error.
async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
    Query(params): Query<AuthQuery>,
    headers: HeaderMap,
) -> Result<Json<RemovedResponse>, (StatusCode, String)> {
    let candidates = [params.token, auth::extract_bearer(&headers)];
    auth::require_token(&state.config, &candidates)?;

    let removed = state.store.delete(&task_id).await;
    if removed {
        state.publish_state().await;
    }
    Ok(Json(RemovedResponse { removed }))
}

/// Remove every task matching the status/age filters (AND semantics).
async fn bulk_delete_tasks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BulkDeleteQuery>,
    headers: HeaderMap,
) -> Result<Json<BulkRemovedResponse>, (StatusCode, String)> {
    let candidates = [params.token, auth::extract_bearer(&headers)];
    auth::require_token(&state.config, &candidates)?;

    let removed = state
        .store
        .delete_where(params.status, params.older_than)
        .await;
    if removed > 0 {
        state.publish_state().await;
    }
    Ok(Json(BulkRemovedResponse { removed }))
}
