//! Connection registry and task-room index.
//!
//! One user id maps to at most one live connection. Room membership is
//! tracked both per connection and per task, so joins, leaves, and
//! disconnect pruning stay proportional to the rooms that user touched.
//! Both maps are only mutated together, under the hub's lock, which keeps
//! room membership a subset of registered connections at all times.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::identity::UserProfile;
use crate::ws::OutboundSender;

/// Presence status reported for a freshly registered connection.
pub const DEFAULT_STATUS: &str = "online";

/// One live, authenticated WebSocket connection.
#[derive(Debug)]
pub struct ConnectionEntry {
    /// Distinguishes this connection from a later one by the same user.
    pub conn_id: Uuid,
    pub profile: UserProfile,
    pub tx: OutboundSender,
    pub connected_at: DateTime<Utc>,
    pub status: String,
    /// Task rooms this connection has joined.
    rooms: HashSet<String>,
}

impl ConnectionEntry {
    pub fn new(profile: UserProfile, tx: OutboundSender) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            profile,
            tx,
            connected_at: Utc::now(),
            status: DEFAULT_STATUS.to_string(),
            rooms: HashSet::new(),
        }
    }

    /// Rooms this connection is currently a member of.
    pub fn rooms(&self) -> impl Iterator<Item = &str> {
        self.rooms.iter().map(String::as_str)
    }
}

/// Presence snapshot entry for one connected user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    #[serde(flatten)]
    pub user: UserProfile,
    pub status: String,
    pub connected_at: DateTime<Utc>,
}

/// Connection and room state for the whole server.
///
/// Carries no synchronization of its own; `SyncHub` owns the single lock
/// around it.
#[derive(Default)]
pub struct SyncRegistry {
    connections: HashMap<String, ConnectionEntry>,
    rooms: HashMap<String, HashSet<String>>,
}

impl SyncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a user, replacing any previous one.
    /// The superseded entry is returned with its room memberships already
    /// pruned; the new connection starts with none, so a reconnecting
    /// client must re-join the rooms it cares about.
    pub fn register(&mut self, entry: ConnectionEntry) -> Option<ConnectionEntry> {
        let user_id = entry.profile.id.clone();
        let previous = self.connections.insert(user_id.clone(), entry);
        if let Some(prev) = &previous {
            for task_id in &prev.rooms {
                self.remove_member(task_id, &user_id);
            }
        }
        previous
    }

    /// Remove a user's connection and every room membership it held.
    /// Idempotent: a second call for the same user returns None and
    /// changes nothing.
    pub fn unregister(&mut self, user_id: &str) -> Option<ConnectionEntry> {
        let entry = self.connections.remove(user_id)?;
        for task_id in &entry.rooms {
            self.remove_member(task_id, user_id);
        }
        Some(entry)
    }

    /// Add a registered user to a task room, creating the room on first
    /// join. Returns false when the user has no connection or is already
    /// a member.
    pub fn join(&mut self, user_id: &str, task_id: &str) -> bool {
        let Some(entry) = self.connections.get_mut(user_id) else {
            return false;
        };
        if !entry.rooms.insert(task_id.to_string()) {
            return false;
        }
        self.rooms
            .entry(task_id.to_string())
            .or_default()
            .insert(user_id.to_string());
        true
    }

    /// Remove a registered user from a task room, dropping the room once
    /// its last member leaves. Returns false when the user was not a
    /// member.
    pub fn leave(&mut self, user_id: &str, task_id: &str) -> bool {
        let Some(entry) = self.connections.get_mut(user_id) else {
            return false;
        };
        if !entry.rooms.remove(task_id) {
            return false;
        }
        self.remove_member(task_id, user_id);
        true
    }

    /// Drop a user from a room's member set, removing the room when it
    /// becomes empty.
    fn remove_member(&mut self, task_id: &str, user_id: &str) {
        if let Some(members) = self.rooms.get_mut(task_id) {
            members.remove(user_id);
            if members.is_empty() {
                self.rooms.remove(task_id);
            }
        }
    }

    pub fn get(&self, user_id: &str) -> Option<&ConnectionEntry> {
        self.connections.get(user_id)
    }

    pub fn get_mut(&mut self, user_id: &str) -> Option<&mut ConnectionEntry> {
        self.connections.get_mut(user_id)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.connections.contains_key(user_id)
    }

    /// User ids of all registered connections.
    pub fn user_ids(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ConnectionEntry> {
        self.connections.values()
    }

    /// Members of a task room. Empty when the room does not exist.
    pub fn room_members(&self, task_id: &str) -> impl Iterator<Item = &str> {
        self.rooms
            .get(task_id)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Presence snapshot of everyone currently connected.
    /// Order is unspecified; clients must not depend on it.
    pub fn presence(&self) -> Vec<PresenceEntry> {
        self.connections
            .values()
            .map(|entry| PresenceEntry {
                user: entry.profile.clone(),
                status: entry.status.clone(),
                connected_at: entry.connected_at,
            })
            .collect()
    }
}
