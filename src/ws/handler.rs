use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;
use tokio::time::timeout;

use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for the WebSocket endpoint. Auth is via `?token=JWT`
/// because browsers cannot set headers on WebSocket requests.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// Close code sent for every handshake failure (policy violation).
/// Clients treat 1008 as fatal and do not schedule a reconnect.
const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. The token is verified before the actor
/// starts; a failed handshake still completes the upgrade and then closes
/// with 1008 so the client can read the close reason.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = params.token else {
        tracing::warn!("WebSocket connection rejected: missing token");
        return ws.on_upgrade(|socket| reject(socket, "Authentication token required"));
    };

    match timeout(state.auth_timeout, state.resolver.verify(&token)).await {
        Ok(Ok(identity)) => {
            tracing::info!(user_id = %identity.user_id, "WebSocket connection authenticated");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, identity))
        }
        Ok(Err(err)) => {
            let reason = err.close_reason();
            tracing::warn!(error = %err, reason = reason, "WebSocket auth failed");
            ws.on_upgrade(move |socket| reject(socket, reason))
        }
        Err(_) => {
            tracing::warn!("WebSocket auth timed out");
            ws.on_upgrade(|socket| reject(socket, "Authentication failed"))
        }
    }
}

/// Complete the upgrade, send a policy-violation close frame, and let the
/// socket drop. Rejected connections never touch the registry.
async fn reject(mut socket: WebSocket, reason: &'static str) {
    let close_frame = CloseFrame {
        code: CLOSE_POLICY_VIOLATION,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(close_frame))).await;
}
