//! Beacon server library logic.

pub mod api_incidents;
pub mod api_ws;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod middleware;
pub mod registry;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
    Extension, Json, Router,
};
use beacon_db::DbPool;
use config::Config;
use dispatch::{DeliveryPolicy, Dispatcher};
use middleware::RateLimiter;
use registry::SubscriberRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Maximum request body size (256 KiB). Incident payloads are small; the cap
/// protects against OOM from oversized submissions.
const MAX_REQUEST_BODY_BYTES: usize = 256 * 1024;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Loaded server configuration.
    pub config: Arc<Config>,
    /// Registry of live subscriber sessions.
    pub registry: SubscriberRegistry,
    /// Broadcast dispatcher for committed events.
    pub dispatcher: Dispatcher,
    /// Rate limiter state.
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Wires up shared state from a pool and configuration.
    ///
    /// The dispatcher and registry share the same subscriber maps: the
    /// session lifecycle writes them, publishes read them.
    pub fn new(pool: DbPool, config: Config) -> Self {
        let registry = SubscriberRegistry::new();
        let dispatcher = Dispatcher::new(
            registry.clone(),
            DeliveryPolicy::from_config(&config.delivery),
        );
        Self {
            pool,
            config: Arc::new(config),
            registry,
            dispatcher,
            rate_limiter: RateLimiter::new(),
        }
    }
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/incidents",
            post(api_incidents::report_incident_handler)
                .get(api_incidents::list_incidents_handler),
        )
        .route("/api/incidents/stats", get(api_incidents::get_stats_handler))
        .route(
            "/api/incidents/{incidentId}",
            get(api_incidents::get_incident_handler),
        )
        .route(
            "/api/incidents/{incidentId}/status",
            patch(api_incidents::update_status_handler),
        )
        .route("/ws", get(api_ws::ws_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(axum::middleware::from_fn(middleware::rate_limit_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
