/// WebSocket endpoint for the live telemetry feed

use axum::{
    extract::ws::{WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
};
use futures::stream::StreamExt;
use tracing::{debug, warn};

use super::AppState;
use crate::hub::Session;

/// Upgrade handler. Inbound messages are capped at the configured size;
/// anything larger closes the connection.
pub async fn ws_telemetry_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let limit = state.session_settings.max_message_size;

    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_telemetry_websocket(socket, state))
}

async fn handle_telemetry_websocket(socket: WebSocket, state: AppState) {
    let session = match Session::connect(state.hub.clone(), state.session_settings).await {
        Ok(session) => session,
        Err(e) => {
            warn!("Rejecting WebSocket client: {}", e);
            return;
        }
    };

    let id = session.id();
    let (sender, receiver) = socket.split();
    let end = session.run(sender, receiver).await;

    debug!(session = %id, reason = ?end, "WebSocket closed");
}
