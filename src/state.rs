use std::sync::Arc;
use std::time::Duration;

use crate::auth::identity::IdentityResolver;
use crate::sync::SyncHub;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Connection registry, task rooms, presence, and broadcast engine
    pub hub: Arc<SyncHub>,
    /// Token verification plus user-directory lookup for the handshake
    pub resolver: Arc<IdentityResolver>,
    /// Bound on the directory lookup during the WebSocket handshake
    pub auth_timeout: Duration,
}
