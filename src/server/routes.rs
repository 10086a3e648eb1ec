/// Router definition

use axum::{routing::get, Router};
use std::path::Path;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::websocket;
use super::AppState;
use crate::utils::WS_PATH;

pub fn create_router(state: AppState, static_path: &Path, enable_cors: bool) -> Router {
    // Single-page app: unknown paths get index.html
    let static_files = ServeDir::new(static_path)
        .fallback(ServeFile::new(static_path.join("index.html")));

    let mut app = Router::new()
        .route("/health", get(handlers::health_check))
        .route(WS_PATH, get(websocket::ws_telemetry_handler))
        .fallback_service(static_files)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if enable_cors {
        app = app.layer(CorsLayer::permissive());
    }

    app
}
