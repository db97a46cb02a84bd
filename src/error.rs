//! Error types for the authentication and sync layers.

use thiserror::Error;

/// Failures while authenticating a WebSocket handshake.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token failed structure, signature, expiry, issuer, or audience checks.
    #[error("invalid or expired token")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    /// Token subject does not match any known user.
    #[error("unknown user")]
    UnknownUser,
    /// The account exists but is deactivated.
    #[error("inactive user")]
    InactiveUser,
}

impl AuthError {
    /// Reason string carried in the policy-violation close frame.
    pub fn close_reason(&self) -> &'static str {
        match self {
            AuthError::UnknownUser | AuthError::InactiveUser => "Invalid or inactive user",
            AuthError::InvalidToken(_) => "Authentication failed",
        }
    }
}

/// Failures while decoding an inbound client frame.
#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    /// Payload was not valid JSON or is missing required fields.
    #[error("Invalid message format")]
    Malformed,
    /// Frame tag is not part of the client vocabulary.
    #[error("Unknown message type: {0}")]
    UnknownType(String),
}
