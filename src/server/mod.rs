//! Receiving side of the changeset protocol.
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint (no auth required)
//! - `GET /roots/{root_id}`: Stored tree
//! - `PUT /roots/{root_id}`: Seed or replace a stored tree
//! - `POST /roots/{root_id}/changeset`: Apply a multipart envelope
//! - `GET /assets/{root_id}/{name}`: Uploaded asset bytes

pub mod auth;
pub mod config;
pub mod context;
pub mod routes;
pub mod storage;

pub use config::{ApiKeyStore, AuthClient, Config};
pub use routes::ApiError;
pub use storage::{ServerStorage, ServerStorageError};

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<ServerStorage>,
    pub api_keys: Arc<ApiKeyStore>,
    /// Serializes read-modify-write of stored trees
    pub write_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(storage: ServerStorage, api_keys: ApiKeyStore) -> Self {
        Self {
            storage: Arc::new(storage),
            api_keys: Arc::new(api_keys),
            write_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// Builds the router. Routes other than `/health` require a bearer token
/// when any API key is configured.
pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    let public_routes = Router::new().route("/health", get(routes::health));

    let mut protected_routes = Router::new()
        .route("/roots/{root_id}", get(routes::get_root).put(routes::put_root))
        .route("/roots/{root_id}/changeset", post(routes::post_changeset))
        .route("/assets/{root_id}/{name}", get(routes::get_asset));

    if !state.api_keys.is_empty() {
        protected_routes = protected_routes.layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));
    }

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}
