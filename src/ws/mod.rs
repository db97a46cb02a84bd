pub mod actor;
pub mod handler;
pub mod protocol;

use tokio::sync::mpsc;

/// Type alias for the sender half of a WebSocket connection's channel.
/// The sync hub clones this to push frames to a specific client; the
/// actor's writer task drains the receiving end into the socket.
pub type OutboundSender = mpsc::UnboundedSender<axum::extract::ws::Message>;
