//! HTTP and WebSocket API for taskpulse.
//!
//! ## Endpoints
//!
//! - `POST /progress` - Ingest one progress event, echo the normalized record
//! - `GET /tasks` - Full snapshot of every tracked task
//! - `DELETE /tasks/{task_id}` - Remove one task
//! - `DELETE /tasks?status=&older_than=` - Bulk removal by status and/or age
//! - `GET /ws` - WebSocket push channel for observers
//! - `GET /health` - Liveness and task count (unauthenticated)

mod auth;
mod routes;
pub mod types;
mod watch;

pub use routes::{router, serve, AppState};
