//! # Weft HTTP API Module
//!
//! This module implements the HTTP REST API server using axum.
//!
//! ## Local Endpoints
//!
//! - `POST /submit` - Submit an item with extracted concept spans
//! - `GET /item/{id}` - Fetch one item with edges and attributions
//! - `GET /items` - List items
//! - `GET /stats` - Graph statistics
//! - `GET /related/{label}` - Co-occurring concepts for a label
//! - `POST /query` - Triple pattern query
//! - `POST /search` - Federated search
//! - `POST /attribution` - Record an attribution link
//! - `POST /item/{id}/privacy` - Change privacy level
//! - `POST /item/{id}/tombstone` - Tombstone an item
//! - `POST /item/{id}/resync` - Re-queue failed deliveries
//! - `POST /export` / `POST /import` - Canonical and N-Triples formats
//! - `GET /peers` - Peer roster and sync jobs
//! - `GET /health` - Health check
//!
//! ## Federation Endpoints
//!
//! - `POST /federation/deliver` - Accept a peer's item envelope
//! - `POST /federation/search` - Peer-facing, trust-capped search
//! - `GET /.well-known/weft.json` - Peer discovery document
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `WEFT_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `WEFT_RATE_LIMIT`: Requests per second (default: 100, 0 to disable)
//! - `WEFT_API_KEY`: If set, requires Bearer token authentication

mod auth;
mod handlers;
mod middleware;
pub mod types;

// Re-exports for external use
pub use auth::get_api_key_from_env;
pub use middleware::{create_rate_limiter, get_rate_limit_from_env};
// Re-export handlers for integration tests (via `weft::api::*`)
#[allow(unused_imports)]
pub use handlers::{
    attribution_handler, deliver_handler, discovery_handler, export_handler, health_handler,
    import_handler, item_handler, items_handler, peers_handler, privacy_handler, query_handler,
    related_handler, remote_search_handler, resync_handler, search_handler, stats_handler,
    submit_handler, tombstone_handler,
};

use crate::federation::Federation;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use weft_core::{Session, WeftError};

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state: the graph session plus the federation layer.
#[derive(Clone)]
pub struct AppState {
    /// The session containing the graph.
    pub session: Arc<RwLock<Session>>,
    /// Sync agent, peer registry and query router.
    pub federation: Arc<Federation>,
}

impl AppState {
    /// Create new app state from an already-shared session and a wired
    /// federation layer.
    #[must_use]
    pub fn new(session: Arc<RwLock<Session>>, federation: Arc<Federation>) -> Self {
        Self {
            session,
            federation,
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build CORS layer from environment configuration.
///
/// Reads `WEFT_CORS_ORIGINS` environment variable:
/// - If "*": allows all origins (development mode - use with caution!)
/// - If not set: defaults to localhost only (restrictive default)
/// - Otherwise: parses comma-separated list of allowed origins
///
/// # Security Note
///
/// The default is restrictive (localhost only). Set `WEFT_CORS_ORIGINS=*`
/// explicitly only for development or if you understand the security implications.
fn build_cors_layer() -> CorsLayer {
    let origins_env = std::env::var("WEFT_CORS_ORIGINS").ok();

    match origins_env.as_deref() {
        Some("*") => {
            // Explicit wildcard - warn about security implications
            tracing::warn!(
                "CORS: Allowing ALL origins (WEFT_CORS_ORIGINS=*). This is insecure for production!"
            );
            CorsLayer::permissive()
        }
        Some(origins) => {
            // Parse comma-separated origins
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!(
                    "CORS: No valid origins in WEFT_CORS_ORIGINS, defaulting to localhost only"
                );
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed_origins)
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            }
        }
        None => {
            // No configuration - default to localhost only (restrictive)
            tracing::info!("CORS: No WEFT_CORS_ORIGINS set, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

/// Build a restrictive CORS layer that only allows localhost origins.
fn build_localhost_cors() -> CorsLayer {
    let localhost_origins = vec![
        "http://localhost:3000".parse::<HeaderValue>().ok(),
        "http://localhost:8080".parse::<HeaderValue>().ok(),
        "http://127.0.0.1:3000".parse::<HeaderValue>().ok(),
        "http://127.0.0.1:8080".parse::<HeaderValue>().ok(),
    ];
    let origins: Vec<HeaderValue> = localhost_origins.into_iter().flatten().collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. CORS - handles preflight requests
/// 2. Tracing - logs all requests
/// 3. Rate Limiting - protects against DoS (if enabled)
/// 4. Authentication - validates API key (if configured)
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer();

    // Check if rate limiting is enabled
    let rate_limit = get_rate_limit_from_env();
    let rate_limiter = if rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", rate_limit);
        Some(create_rate_limiter(rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    // Check if authentication is enabled
    let has_auth = get_api_key_from_env().is_some();
    if has_auth {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!(
            "API key authentication DISABLED - all endpoints are publicly accessible! \
             Set WEFT_API_KEY environment variable to enable authentication."
        );
    }

    // Build base router with routes
    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/.well-known/weft.json", get(handlers::discovery_handler))
        .route("/submit", post(handlers::submit_handler))
        .route("/item/{id}", get(handlers::item_handler))
        .route("/item/{id}/privacy", post(handlers::privacy_handler))
        .route("/item/{id}/tombstone", post(handlers::tombstone_handler))
        .route("/item/{id}/resync", post(handlers::resync_handler))
        .route("/items", get(handlers::items_handler))
        .route("/stats", get(handlers::stats_handler))
        .route("/related/{label}", get(handlers::related_handler))
        .route("/query", post(handlers::query_handler))
        .route("/search", post(handlers::search_handler))
        .route("/attribution", post(handlers::attribution_handler))
        .route("/export", post(handlers::export_handler))
        .route("/import", post(handlers::import_handler))
        .route("/peers", get(handlers::peers_handler))
        .route("/federation/deliver", post(handlers::deliver_handler))
        .route("/federation/search", post(handlers::remote_search_handler));

    // Apply authentication middleware (innermost - runs last on request)
    if has_auth {
        router = router.layer(axum_middleware::from_fn(auth::api_key_auth_middleware));
    }

    // Apply rate limiting middleware
    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    // Apply CORS, body limit, and tracing (outermost layers)
    router
        .layer(axum::extract::DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Start the HTTP server.
pub async fn run_server(addr: &str, state: AppState) -> Result<(), WeftError> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| WeftError::Io(format!("Bind failed: {}", e)))?;

    tracing::info!("Weft HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .await
        .map_err(|e| WeftError::Io(format!("Server error: {}", e)))
}
