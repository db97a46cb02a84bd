//! Real-time synchronization: the connection registry, task rooms, and
//! the broadcast engine that fans domain events out to WebSocket clients.

pub mod hub;
pub mod registry;

pub use hub::{SyncHub, SyncStats};
pub use registry::{ConnectionEntry, PresenceEntry, SyncRegistry};
