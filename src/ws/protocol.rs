//! Wire protocol: typed client and server frames, the JSON codec, and
//! inbound dispatch.
//!
//! Inbound frames are flat JSON objects tagged by `type`, for example
//! `{"type": "joinTaskRoom", "taskId": "t1"}`. Outbound frames wrap their
//! payload in a `data` object: `{"type": "userTyping", "data": {...}}`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::auth::identity::UserProfile;
use crate::error::FrameError;
use crate::sync::{PresenceEntry, SyncHub};
use crate::ws::OutboundSender;

/// Frames a client may send after the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Subscribe to task-scoped events for one task.
    #[serde(rename_all = "camelCase")]
    JoinTaskRoom { task_id: String },
    /// Unsubscribe from a task room.
    #[serde(rename_all = "camelCase")]
    LeaveTaskRoom { task_id: String },
    /// Typing indicator, relayed to the other members of the task room.
    #[serde(rename_all = "camelCase")]
    Typing { task_id: String, is_typing: bool },
    /// Application-level liveness probe.
    Ping {},
    /// Change the presence status shown to other users.
    UpdateStatus { status: String },
}

/// Frames the server sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerFrame {
    /// Handshake acknowledgement carrying the caller's own profile.
    Connected { user: UserProfile },
    /// Full presence snapshot, rebroadcast whenever it changes.
    ConnectedUsers {
        users: Vec<PresenceEntry>,
        count: usize,
    },
    #[serde(rename_all = "camelCase")]
    JoinedTaskRoom { task_id: String, message: String },
    #[serde(rename_all = "camelCase")]
    LeftTaskRoom { task_id: String, message: String },
    #[serde(rename_all = "camelCase")]
    UserTyping {
        user: UserProfile,
        task_id: String,
        is_typing: bool,
    },
    /// Reply to a client ping; timestamp is server time in milliseconds.
    Pong { timestamp: i64 },
    Error { message: String },
    TaskCreated { task: Value },
    TaskUpdated { task: Value, changes: Value },
    #[serde(rename_all = "camelCase")]
    TaskDeleted { task_id: String },
    #[serde(rename_all = "camelCase")]
    CommentAdded { task_id: String, comment: Value },
    #[serde(rename_all = "camelCase")]
    TaskProgressUpdated {
        task_id: String,
        #[serde(flatten)]
        data: Map<String, Value>,
    },
    Notification {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
}

/// Decode a raw inbound payload into a typed frame.
/// An unknown tag is distinguished from a structurally bad frame so the
/// caller can report "Unknown message type" vs "Invalid message format".
pub fn parse_client_frame(raw: &str) -> Result<ClientFrame, FrameError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| FrameError::Malformed)?;
    let tag = value.get("type").and_then(Value::as_str).map(str::to_owned);
    match serde_json::from_value::<ClientFrame>(value) {
        Ok(frame) => Ok(frame),
        Err(_) => match tag {
            Some(tag) if !is_known_type(&tag) => Err(FrameError::UnknownType(tag)),
            _ => Err(FrameError::Malformed),
        },
    }
}

/// Tags accepted by `ClientFrame`. Must stay in sync with the enum.
fn is_known_type(tag: &str) -> bool {
    matches!(
        tag,
        "joinTaskRoom" | "leaveTaskRoom" | "typing" | "ping" | "updateStatus"
    )
}

/// Serialize a frame and queue it on one connection's outbound channel.
/// A failed send means the connection is going away; the actor's cleanup
/// path handles removal.
pub fn send_frame(tx: &OutboundSender, frame: &ServerFrame) {
    if let Ok(text) = serde_json::to_string(frame) {
        let _ = tx.send(axum::extract::ws::Message::Text(text.into()));
    }
}

/// Dispatch one inbound text frame from an authenticated connection.
/// Protocol errors are answered on the sender's own channel and never
/// terminate the connection.
pub fn handle_text_frame(raw: &str, user_id: &str, hub: &SyncHub, tx: &OutboundSender) {
    match parse_client_frame(raw) {
        Ok(ClientFrame::JoinTaskRoom { task_id }) => hub.join_room(user_id, &task_id),
        Ok(ClientFrame::LeaveTaskRoom { task_id }) => hub.leave_room(user_id, &task_id),
        Ok(ClientFrame::Typing { task_id, is_typing }) => {
            hub.typing(user_id, &task_id, is_typing)
        }
        Ok(ClientFrame::Ping {}) => {
            let pong = ServerFrame::Pong {
                timestamp: Utc::now().timestamp_millis(),
            };
            send_frame(tx, &pong);
        }
        Ok(ClientFrame::UpdateStatus { status }) => hub.set_status(user_id, &status),
        Err(err) => {
            tracing::warn!(user_id = %user_id, error = %err, "Rejected client frame");
            send_frame(
                tx,
                &ServerFrame::Error {
                    message: err.to_string(),
                },
            );
        }
    }
}
