//! Opaque bearer-token check for the API boundary.
//!
//! Tokens are an unstructured allow-list from the configuration; an empty
//! list disables the check entirely. Clients may present the token as an
//! `Authorization: Bearer` header, a `?token=` query parameter, or (for
//! progress posts) smuggled as `meta._token` in the event body.

use axum::http::{HeaderMap, StatusCode};

use crate::config::Config;

fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    if a_bytes.len() != b_bytes.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for i in 0..a_bytes.len() {
        diff |= a_bytes[i] ^ b_bytes[i];
    }
    diff == 0
}

/// Pull the token out of an `Authorization: Bearer <token>` header.
pub fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("authorization")?.to_str().ok()?.trim();
    let rest = if raw.len() >= 7 && raw[..7].eq_ignore_ascii_case("bearer ") {
        &raw[7..]
    } else {
        return None;
    };
    let rest = rest.trim();
    (!rest.is_empty()).then(|| rest.to_string())
}

/// Whether any candidate matches an accepted token (vacuously true when the
/// token list is empty).
pub fn token_allowed(config: &Config, candidates: &[Option<String>]) -> bool {
    if !config.auth_required() {
        return true;
    }
    candidates.iter().flatten().any(|candidate| {
        config
            .api_tokens
            .iter()
            .any(|token| constant_time_eq(candidate, token))
    })
}

/// Reject outcome for handlers: 401 with a terse reason.
pub fn require_token(
    config: &Config,
    candidates: &[Option<String>],
) -> Result<(), (StatusCode, String)> {
    if token_allowed(config, candidates) {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "Invalid API token".to_string()))
    }
}
