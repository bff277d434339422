//! # Authentication Module
//!
//! Bearer-key authentication for the Weft HTTP API.
//!
//! Two key spaces, one header. The node operator's key (`WEFT_API_KEY`)
//! gates the whole local API surface. The federation endpoints are
//! exempt from it and authenticate per peer instead: delivery by the
//! envelope signature, search by the shared per-peer key (see
//! [`peer_key_matches`]). Both comparisons are constant-time.
//!
//! ## Configuration
//!
//! - `WEFT_API_KEY`: if set and non-empty, all non-open endpoints
//!   require `Authorization: Bearer <key>`; if unset, the local API is
//!   unauthenticated.

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

// =============================================================================
// KEY COMPARISON
// =============================================================================

/// Constant-time key comparison.
///
/// Both sides are padded to the same length so `ct_eq` always runs over
/// the same number of bytes; the length check happens after the scan so
/// a short guess leaks nothing through timing.
pub(crate) fn keys_match(provided: &str, expected: &str) -> bool {
    let provided_bytes = provided.as_bytes();
    let expected_bytes = expected.as_bytes();

    let max_len = provided_bytes.len().max(expected_bytes.len());
    let mut padded_provided = vec![0u8; max_len];
    let mut padded_expected = vec![0u8; max_len];
    padded_provided[..provided_bytes.len()].copy_from_slice(provided_bytes);
    padded_expected[..expected_bytes.len()].copy_from_slice(expected_bytes);

    let bytes_match: bool = padded_provided.ct_eq(&padded_expected).into();
    bytes_match && provided_bytes.len() == expected_bytes.len()
}

/// Pull the bearer token out of an Authorization header, accepting both
/// `Bearer <key>` and a raw `<key>`.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    Some(value.strip_prefix("Bearer ").unwrap_or(value))
}

/// Whether the request authenticates as the named peer: a non-empty key
/// must be registered for it, and the presented bearer token must match.
pub(crate) fn peer_key_matches(headers: &HeaderMap, peer_key: &str) -> bool {
    if peer_key.is_empty() {
        return false;
    }
    bearer_token(headers).is_some_and(|token| keys_match(token, peer_key))
}

// =============================================================================
// OPERATOR API KEY
// =============================================================================

/// Operator API key from the environment.
///
/// Returns `Some(key)` if `WEFT_API_KEY` is set and non-empty,
/// `None` otherwise (disabling authentication).
pub fn get_api_key_from_env() -> Option<String> {
    std::env::var("WEFT_API_KEY").ok().filter(|k| !k.is_empty())
}

/// Paths the operator key never gates: health checks, peer discovery,
/// and the federation endpoints (which authenticate per peer).
fn is_open_path(path: &str) -> bool {
    path == "/health"
        || path == "/.well-known/weft.json"
        || path == "/federation/deliver"
        || path == "/federation/search"
}

/// Operator key middleware.
///
/// With `WEFT_API_KEY` set, every request outside [`is_open_path`] must
/// carry the key; without it, everything passes.
pub async fn api_key_auth_middleware(
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    let Some(expected) = get_api_key_from_env() else {
        return Ok(next.run(request).await);
    };

    if is_open_path(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    match bearer_token(request.headers()) {
        Some(provided) if keys_match(provided, &expected) => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!(
                event = "auth_failure",
                reason = "invalid_api_key",
                "request carried a wrong operator key"
            );
            Err((StatusCode::UNAUTHORIZED, "Unauthorized"))
        }
        None => {
            tracing::warn!(
                event = "auth_failure",
                reason = "missing_authorization_header",
                "request carried no Authorization header"
            );
            Err((StatusCode::UNAUTHORIZED, "Unauthorized"))
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
