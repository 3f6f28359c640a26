//! Configuration management for taskpulse.
//!
//! Configuration can be set via environment variables:
//! - `TASKPULSE_HOST` - Optional. Server host. Defaults to `0.0.0.0`.
//! - `TASKPULSE_PORT` - Optional. Server port. Defaults to `8000`.
//! - `TASKPULSE_CLEANUP_INTERVAL` - Optional. Sweep cadence in seconds. Defaults to `5.0`.
//! - `TASKPULSE_RETENTION_SECONDS` - Optional. How long closed tasks stay visible. Defaults to `120.0`.
//! - `TASKPULSE_STALE_SECONDS` - Optional. Idle seconds before a task is flagged stale. `0` disables. Defaults to `0`.
//! - `TASKPULSE_MAX_TASK_AGE` - Optional. Hard idle-age ceiling for any task. `0` disables. Defaults to `0`.
//! - `TASKPULSE_STORAGE_PATH` - Optional. Snapshot file path; persistence is off when unset.
//! - `TASKPULSE_API_TOKENS` - Optional. Comma-separated accepted bearer tokens
//!   (falls back to `TASKPULSE_API_TOKEN`). Auth is disabled when empty.
//! - `TASKPULSE_ALLOW_ORIGINS` - Optional. Comma-separated CORS origins.

use std::path::PathBuf;
use thiserror::Error;

use crate::sweep::SweepPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Seconds between lifecycle sweeps
    pub cleanup_interval: f64,

    /// Seconds a closed task remains visible before eviction
    pub retention_seconds: f64,

    /// Idle seconds before an active task is flagged stale (0 disables)
    pub stale_seconds: f64,

    /// Hard idle-age ceiling for any task regardless of status (0 disables)
    pub max_task_age: f64,

    /// Snapshot file path; persistence is disabled when unset
    pub storage_path: Option<PathBuf>,

    /// Accepted bearer tokens; empty disables the auth check
    pub api_tokens: Vec<String>,

    /// Allowed CORS origins; empty disables the CORS layer
    pub allow_origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Numeric tuning knobs fall back to their defaults when unparseable, but
    /// a malformed `TASKPULSE_PORT` is a hard error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("TASKPULSE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = std::env::var("TASKPULSE_PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("TASKPULSE_PORT".to_string(), format!("{}", e)))?;

        let cleanup_interval = float_env("TASKPULSE_CLEANUP_INTERVAL", 5.0);
        let retention_seconds = float_env("TASKPULSE_RETENTION_SECONDS", 120.0);
        let stale_seconds = float_env("TASKPULSE_STALE_SECONDS", 0.0);
        let max_task_age = float_env("TASKPULSE_MAX_TASK_AGE", 0.0);

        let storage_path = std::env::var("TASKPULSE_STORAGE_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let api_tokens = match std::env::var("TASKPULSE_API_TOKENS") {
            Ok(csv) => split_csv(&csv),
            Err(_) => std::env::var("TASKPULSE_API_TOKEN")
                .ok()
                .filter(|t| !t.trim().is_empty())
                .map(|t| vec![t.trim().to_string()])
                .unwrap_or_default(),
        };

        let allow_origins = std::env::var("TASKPULSE_ALLOW_ORIGINS")
            .map(|csv| split_csv(&csv))
            .unwrap_or_default();

        Ok(Self {
            host,
            port,
            cleanup_interval,
            retention_seconds,
            stale_seconds,
            max_task_age,
            storage_path,
            api_tokens,
            allow_origins,
        })
    }

    /// Whether inbound calls must present an accepted token.
    pub fn auth_required(&self) -> bool {
        !self.api_tokens.is_empty()
    }

    pub fn sweep_policy(&self) -> SweepPolicy {
        SweepPolicy {
            stale_seconds: self.stale_seconds,
            retention_seconds: self.retention_seconds,
            max_task_age: self.max_task_age,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cleanup_interval: 5.0,
            retention_seconds: 120.0,
            stale_seconds: 0.0,
            max_task_age: 0.0,
            storage_path: None,
            api_tokens: Vec::new(),
            allow_origins: Vec::new(),
        }
    }
}

fn float_env(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| parse_float(&v))
        .unwrap_or(default)
}

fn parse_float(value: &str) -> Option<f64> {
    value.trim().parse().ok()
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
