//! Cellar server library logic.

pub mod api;
pub mod api_wines;
pub mod api_ws;
pub mod config;

use axum::{extract::DefaultBodyLimit, routing::get, Extension, Json, Router};
use cellar_db::DbPool;
use cellar_hub::Hub;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Maximum accepted request body size.
const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Fan-out hub for catalogue change events.
    pub hub: Hub,
}

/// Health check handler.
///
/// Returns `200 OK` with server status and version.
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
            "/wines",
            get(api_wines::list_wines_handler).post(api_wines::create_wine_handler),
        )
        .route(
            "/wines/{id}",
            get(api_wines::get_wine_handler)
                .put(api_wines::update_wine_handler)
                .delete(api_wines::delete_wine_handler),
        )
        .route("/ws", get(api_ws::ws_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
