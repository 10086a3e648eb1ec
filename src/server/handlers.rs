/// HTTP handlers outside the WebSocket feed

use axum::{extract::State, Json};
use serde::Serialize;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct HealthInfo {
    pub status: &'static str,
    pub version: &'static str,
    /// Connected telemetry clients
    pub clients: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthInfo> {
    Json(HealthInfo {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        clients: state.hub.active_count(),
    })
}
