//! # taskpulse
//!
//! Real-time progress telemetry relay. Worker jobs report discrete progress
//! events over HTTP; the service keeps the latest state per task and pushes
//! full snapshots to dashboard observers over WebSocket.
//!
//! ## Data flow
//!
//! ```text
//!   worker POST /progress ──► TaskStore.apply ──► Broadcaster ──► observers
//!                                   ▲
//!                          lifecycle sweeper
//!                     (stale marking, retention,
//!                        max-age eviction)
//! ```
//!
//! ## Modules
//! - `store`: task records and the concurrent state store
//! - `broadcast`: snapshot fan-out to observers
//! - `sweep`: background lifecycle scheduler
//! - `persist`: JSON snapshot persistence
//! - `api`: HTTP/WebSocket boundary

pub mod api;
pub mod broadcast;
pub mod config;
pub mod persist;
pub mod store;
pub mod sweep;

pub use broadcast::Broadcaster;
pub use config::Config;
pub use persist::Persister;
pub use store::{ProgressEvent, Snapshot, TaskRecord, TaskStatus, TaskStore};
pub use sweep::SweepPolicy;
