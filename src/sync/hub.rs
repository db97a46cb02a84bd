//! The sync hub: connection registry, room index, presence, and the
//! broadcast engine behind one lock.
//!
//! Every public method takes the lock once, applies its state change,
//! performs any fan-out, and reaps connections whose outbound channel is
//! gone. Reaping inside the same critical section keeps the presence
//! snapshot consistent with the registry.

use std::collections::HashSet;

use axum::extract::ws::{CloseFrame, Message};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::auth::identity::UserProfile;
use crate::sync::registry::{ConnectionEntry, PresenceEntry, SyncRegistry};
use crate::ws::protocol::ServerFrame;
use crate::ws::OutboundSender;

/// Normal-closure code sent to a connection replaced by a newer login.
/// Clients treat 1000 as a clean close and do not reconnect.
const CLOSE_SUPERSEDED: u16 = 1000;

/// Counters exposed on the stats endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub connected_users: usize,
    pub active_task_rooms: usize,
}

/// Single service object owning all mutable sync state.
pub struct SyncHub {
    state: Mutex<SyncRegistry>,
}

impl SyncHub {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SyncRegistry::new()),
        }
    }

    /// Register an authenticated connection, superseding any previous one
    /// by the same user. Sends the welcome frame to the new connection and
    /// rebroadcasts presence to everyone.
    /// Returns the connection id the actor must present at disconnect.
    pub fn register(&self, profile: UserProfile, tx: OutboundSender) -> Uuid {
        let mut reg = self.state.lock();
        let entry = ConnectionEntry::new(profile, tx);
        let conn_id = entry.conn_id;
        let user_id = entry.profile.id.clone();
        let name = entry.profile.name.clone();

        if let Some(previous) = reg.register(entry) {
            tracing::info!(user_id = %user_id, "Superseding previous connection");
            let _ = previous.tx.send(Message::Close(Some(CloseFrame {
                code: CLOSE_SUPERSEDED,
                reason: "Superseded by a newer connection".into(),
            })));
        }

        tracing::info!(user_id = %user_id, name = %name, "User connected");

        let mut dead = Vec::new();
        if let Some(entry) = reg.get(&user_id) {
            let welcome = ServerFrame::Connected {
                user: entry.profile.clone(),
            };
            if !send_to_entry(entry, &welcome) {
                dead.push(user_id.clone());
            }
        }
        dead.extend(broadcast_presence(&reg));
        reap(&mut reg, dead);
        conn_id
    }

    /// Actor cleanup entry point. Removes the connection only while it is
    /// still the one the actor owns, so a superseded actor cannot evict
    /// its successor.
    pub fn disconnect(&self, user_id: &str, conn_id: Uuid) {
        let mut reg = self.state.lock();
        match reg.get(user_id) {
            Some(entry) if entry.conn_id == conn_id => {}
            _ => return,
        }
        remove_connection(&mut reg, user_id);
    }

    /// Join a task room and acknowledge to the joining connection only.
    /// Ignored when the user has no live connection; a repeat join sends
    /// nothing.
    pub fn join_room(&self, user_id: &str, task_id: &str) {
        let mut reg = self.state.lock();
        if !reg.join(user_id, task_id) {
            return;
        }
        tracing::debug!(user_id = %user_id, task_id = %task_id, "User joined task room");
        let ack = ServerFrame::JoinedTaskRoom {
            task_id: task_id.to_string(),
            message: format!("Joined task room {task_id}"),
        };
        ack_or_reap(&mut reg, user_id, &ack);
    }

    /// Leave a task room and acknowledge to the leaving connection only.
    /// Ignored when the user was not a member.
    pub fn leave_room(&self, user_id: &str, task_id: &str) {
        let mut reg = self.state.lock();
        if !reg.leave(user_id, task_id) {
            return;
        }
        tracing::debug!(user_id = %user_id, task_id = %task_id, "User left task room");
        let ack = ServerFrame::LeftTaskRoom {
            task_id: task_id.to_string(),
            message: format!("Left task room {task_id}"),
        };
        ack_or_reap(&mut reg, user_id, &ack);
    }

    /// Relay a typing indicator to the other members of a task room.
    /// The sender's public profile is embedded; the sender is excluded.
    pub fn typing(&self, user_id: &str, task_id: &str, is_typing: bool) {
        let mut reg = self.state.lock();
        let Some(sender) = reg.get(user_id) else {
            return;
        };
        let frame = ServerFrame::UserTyping {
            user: sender.profile.clone(),
            task_id: task_id.to_string(),
            is_typing,
        };
        let targets: Vec<String> = reg
            .room_members(task_id)
            .filter(|member| *member != user_id)
            .map(str::to_string)
            .collect();
        let dead = send_to_users(&reg, targets.iter().map(String::as_str), &frame);
        reap(&mut reg, dead);
    }

    /// Update a user's presence status and rebroadcast the snapshot.
    pub fn set_status(&self, user_id: &str, status: &str) {
        let mut reg = self.state.lock();
        let Some(entry) = reg.get_mut(user_id) else {
            return;
        };
        entry.status = status.to_string();
        tracing::debug!(user_id = %user_id, status = %status, "Presence status updated");
        let dead = broadcast_presence(&reg);
        reap(&mut reg, dead);
    }

    /// Connection and room counters.
    pub fn stats(&self) -> SyncStats {
        let reg = self.state.lock();
        SyncStats {
            connected_users: reg.connection_count(),
            active_task_rooms: reg.room_count(),
        }
    }
}

/// Domain event broadcasts and presence queries for the application layer
/// that owns task, comment, and account state.
#[allow(dead_code)]
impl SyncHub {
    /// Remove a user's connection unconditionally and rebroadcast presence.
    /// Calling this again for an already-removed user changes nothing and
    /// sends nothing.
    pub fn unregister(&self, user_id: &str) {
        let mut reg = self.state.lock();
        remove_connection(&mut reg, user_id);
    }

    /// Announce a newly created task to every client except the actor
    /// responsible for the change.
    pub fn task_created(&self, task: Value, exclude_user: Option<&str>) {
        let mut reg = self.state.lock();
        let frame = ServerFrame::TaskCreated { task };
        let dead = send_to_all(&reg, &frame, exclude_user);
        reap(&mut reg, dead);
    }

    /// Announce a task update to the task's room members and every
    /// connected client, at most once per client and never to
    /// `exclude_user`.
    pub fn task_updated(
        &self,
        task_id: &str,
        task: Value,
        changes: Value,
        exclude_user: Option<&str>,
    ) {
        let mut reg = self.state.lock();
        let frame = ServerFrame::TaskUpdated { task, changes };
        let dead = fan_out_room_and_all(&reg, task_id, &frame, exclude_user);
        reap(&mut reg, dead);
    }

    /// Announce a deleted task to the room members and every connected
    /// client, at most once per client.
    pub fn task_deleted(&self, task_id: &str, exclude_user: Option<&str>) {
        let mut reg = self.state.lock();
        let frame = ServerFrame::TaskDeleted {
            task_id: task_id.to_string(),
        };
        let dead = fan_out_room_and_all(&reg, task_id, &frame, exclude_user);
        reap(&mut reg, dead);
    }

    /// Announce a new comment to members of the task's room only.
    pub fn comment_added(&self, task_id: &str, comment: Value, exclude_user: Option<&str>) {
        let mut reg = self.state.lock();
        let frame = ServerFrame::CommentAdded {
            task_id: task_id.to_string(),
            comment,
        };
        let targets: Vec<String> = reg
            .room_members(task_id)
            .filter(|member| Some(*member) != exclude_user)
            .map(str::to_string)
            .collect();
        let dead = send_to_users(&reg, targets.iter().map(String::as_str), &frame);
        reap(&mut reg, dead);
    }

    /// Announce a task progress change to every client, the actor included.
    pub fn progress_updated(&self, task_id: &str, data: Value) {
        let mut reg = self.state.lock();
        let frame = ServerFrame::TaskProgressUpdated {
            task_id: task_id.to_string(),
            data: into_object(data),
        };
        let dead = send_to_all(&reg, &frame, None);
        reap(&mut reg, dead);
    }

    /// Deliver a one-off notification to a single user, stamping a
    /// timestamp when the payload lacks one. Dropped silently when the
    /// user is offline.
    pub fn notify_user(&self, user_id: &str, payload: Value) {
        let mut reg = self.state.lock();
        let mut payload = into_object(payload);
        payload
            .entry("timestamp".to_string())
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
        let frame = ServerFrame::Notification { payload };
        let dead = send_to_users(&reg, [user_id], &frame);
        reap(&mut reg, dead);
    }

    /// Whether a user currently has a live connection.
    pub fn is_user_online(&self, user_id: &str) -> bool {
        self.state.lock().contains(user_id)
    }

    /// Presence snapshot of everyone currently connected.
    pub fn snapshot(&self) -> Vec<PresenceEntry> {
        self.state.lock().presence()
    }
}

impl Default for SyncHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Unregister one user and, when anything was removed, rebroadcast
/// presence.
fn remove_connection(reg: &mut SyncRegistry, user_id: &str) {
    if reg.unregister(user_id).is_none() {
        return;
    }
    tracing::info!(user_id = %user_id, "User disconnected");
    let dead = broadcast_presence(reg);
    reap(reg, dead);
}

/// Drop connections whose outbound channel is closed, rebroadcasting
/// presence until a snapshot delivers without discovering more dead
/// connections. Terminates because each pass shrinks the registry.
fn reap(reg: &mut SyncRegistry, mut dead: Vec<String>) {
    while !dead.is_empty() {
        let mut removed = false;
        for user_id in dead.drain(..) {
            if reg.unregister(&user_id).is_some() {
                removed = true;
                tracing::warn!(user_id = %user_id, "Dropped unreachable connection");
            }
        }
        if !removed {
            break;
        }
        dead = broadcast_presence(reg);
    }
}

/// Send the full presence snapshot to every connection. Returns the ids
/// whose channel rejected the send.
fn broadcast_presence(reg: &SyncRegistry) -> Vec<String> {
    let frame = ServerFrame::ConnectedUsers {
        users: reg.presence(),
        count: reg.connection_count(),
    };
    send_to_all(reg, &frame, None)
}

/// Union of a task room's members and every connected client, minus the
/// excluded user. Room membership is a subset of the registry, so each
/// client is reached at most once.
fn fan_out_room_and_all(
    reg: &SyncRegistry,
    task_id: &str,
    frame: &ServerFrame,
    exclude: Option<&str>,
) -> Vec<String> {
    let targets: HashSet<&str> = reg
        .room_members(task_id)
        .chain(reg.user_ids())
        .filter(|id| Some(*id) != exclude)
        .collect();
    send_to_users(reg, targets.iter().copied(), frame)
}

/// Fan a frame out to every connection except `exclude`. Returns ids of
/// connections that could not be reached.
fn send_to_all(reg: &SyncRegistry, frame: &ServerFrame, exclude: Option<&str>) -> Vec<String> {
    let Some(text) = encode(frame) else {
        return Vec::new();
    };
    let mut dead = Vec::new();
    for entry in reg.entries() {
        if Some(entry.profile.id.as_str()) == exclude {
            continue;
        }
        if entry.tx.send(text_message(&text)).is_err() {
            dead.push(entry.profile.id.clone());
        }
    }
    dead
}

/// Deliver a frame to each user id in `targets`. Ids without a live
/// connection are skipped. Returns ids whose channel rejected the send.
fn send_to_users<'a>(
    reg: &SyncRegistry,
    targets: impl IntoIterator<Item = &'a str>,
    frame: &ServerFrame,
) -> Vec<String> {
    let Some(text) = encode(frame) else {
        return Vec::new();
    };
    let mut dead = Vec::new();
    for user_id in targets {
        let Some(entry) = reg.get(user_id) else {
            continue;
        };
        if entry.tx.send(text_message(&text)).is_err() {
            dead.push(user_id.to_string());
        }
    }
    dead
}

/// Send an acknowledgement to one user, reaping the connection when the
/// channel is gone.
fn ack_or_reap(reg: &mut SyncRegistry, user_id: &str, frame: &ServerFrame) {
    let delivered = match reg.get(user_id) {
        Some(entry) => send_to_entry(entry, frame),
        None => true,
    };
    if !delivered {
        reap(reg, vec![user_id.to_string()]);
    }
}

/// Serialize and queue one frame for one connection.
fn send_to_entry(entry: &ConnectionEntry, frame: &ServerFrame) -> bool {
    match encode(frame) {
        Some(text) => entry.tx.send(text_message(&text)).is_ok(),
        None => true,
    }
}

fn encode(frame: &ServerFrame) -> Option<String> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(text),
        Err(err) => {
            tracing::error!(error = %err, "Failed to encode outbound frame");
            None
        }
    }
}

fn text_message(text: &str) -> Message {
    Message::Text(text.into())
}

/// Coerce an arbitrary payload into a JSON object so it can be flattened
/// into the frame body.
fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::Role;
    use serde_json::json;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn profile(id: &str) -> UserProfile {
        UserProfile {
            id: id.to_string(),
            name: format!("User {id}"),
            email: format!("{id}@example.com"),
            role: Role::Member,
            avatar: None,
        }
    }

    fn connect(hub: &SyncHub, id: &str) -> (Uuid, UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = hub.register(profile(id), tx);
        (conn_id, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Message>) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let Message::Text(text) = msg {
                frames.push(serde_json::from_str(text.as_str()).unwrap());
            }
        }
        frames
    }

    fn count(frames: &[ServerFrame], pred: impl Fn(&ServerFrame) -> bool) -> usize {
        frames.iter().filter(|frame| pred(frame)).count()
    }

    #[test]
    fn register_sends_welcome_then_presence() {
        let hub = SyncHub::new();
        let (_conn, mut rx) = connect(&hub, "alice");

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[0],
            ServerFrame::Connected {
                user: profile("alice")
            }
        );
        match &frames[1] {
            ServerFrame::ConnectedUsers { users, count } => {
                assert_eq!(*count, 1);
                assert_eq!(users[0].user.id, "alice");
                assert_eq!(users[0].status, "online");
            }
            other => panic!("expected connectedUsers, got {other:?}"),
        }
    }

    #[test]
    fn supersede_closes_old_connection_and_guards_cleanup() {
        let hub = SyncHub::new();
        let (first_conn, mut rx1) = connect(&hub, "alice");
        let (second_conn, _rx2) = connect(&hub, "alice");

        assert_ne!(first_conn, second_conn);
        assert_eq!(hub.stats().connected_users, 1);

        let mut saw_close = false;
        while let Ok(msg) = rx1.try_recv() {
            if let Message::Close(Some(frame)) = msg {
                assert_eq!(frame.code, 1000);
                saw_close = true;
            }
        }
        assert!(saw_close, "superseded connection should receive a close frame");

        // The superseded actor's cleanup must not evict the successor
        hub.disconnect("alice", first_conn);
        assert!(hub.is_user_online("alice"));

        hub.disconnect("alice", second_conn);
        assert!(!hub.is_user_online("alice"));
    }

    #[test]
    fn supersede_does_not_inherit_room_memberships() {
        let hub = SyncHub::new();
        let (_c1, _rx1) = connect(&hub, "alice");
        hub.join_room("alice", "task-1");
        assert_eq!(hub.stats().active_task_rooms, 1);

        let (_c2, mut rx2) = connect(&hub, "alice");
        assert_eq!(hub.stats().active_task_rooms, 0);

        // Events scoped to the old room no longer reach the new connection
        drain(&mut rx2);
        hub.comment_added("task-1", json!({"text": "hi"}), None);
        assert_eq!(drain(&mut rx2).len(), 0);
    }

    #[test]
    fn unregister_is_idempotent_and_broadcasts_once() {
        let hub = SyncHub::new();
        let (_a, _rx_a) = connect(&hub, "alice");
        let (_b, mut rx_b) = connect(&hub, "bob");
        drain(&mut rx_b);

        hub.unregister("alice");
        hub.unregister("alice");

        let frames = drain(&mut rx_b);
        assert_eq!(
            count(&frames, |f| matches!(f, ServerFrame::ConnectedUsers { .. })),
            1
        );
    }

    #[test]
    fn join_acks_once_and_repeat_join_is_silent() {
        let hub = SyncHub::new();
        let (_a, mut rx) = connect(&hub, "alice");
        drain(&mut rx);

        hub.join_room("alice", "task-1");
        hub.join_room("alice", "task-1");

        let frames = drain(&mut rx);
        assert_eq!(
            frames,
            vec![ServerFrame::JoinedTaskRoom {
                task_id: "task-1".to_string(),
                message: "Joined task room task-1".to_string(),
            }]
        );
    }

    #[test]
    fn leave_acks_only_members() {
        let hub = SyncHub::new();
        let (_a, mut rx) = connect(&hub, "alice");
        drain(&mut rx);

        hub.leave_room("alice", "task-1");
        assert_eq!(drain(&mut rx).len(), 0);

        hub.join_room("alice", "task-1");
        drain(&mut rx);
        hub.leave_room("alice", "task-1");
        let frames = drain(&mut rx);
        assert_eq!(
            frames,
            vec![ServerFrame::LeftTaskRoom {
                task_id: "task-1".to_string(),
                message: "Left task room task-1".to_string(),
            }]
        );
    }

    #[test]
    fn typing_reaches_other_room_members_only() {
        let hub = SyncHub::new();
        let (_a, mut rx_a) = connect(&hub, "alice");
        let (_b, mut rx_b) = connect(&hub, "bob");
        let (_d, mut rx_d) = connect(&hub, "dave");
        hub.join_room("alice", "task-1");
        hub.join_room("bob", "task-1");
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain(&mut rx_d);

        hub.typing("alice", "task-1", true);

        let to_bob = drain(&mut rx_b);
        assert_eq!(
            to_bob,
            vec![ServerFrame::UserTyping {
                user: profile("alice"),
                task_id: "task-1".to_string(),
                is_typing: true,
            }]
        );
        assert_eq!(drain(&mut rx_a).len(), 0, "sender must not see own typing");
        assert_eq!(drain(&mut rx_d).len(), 0, "non-members must not see typing");
    }

    #[test]
    fn task_created_excludes_the_actor() {
        let hub = SyncHub::new();
        let (_a, mut rx_a) = connect(&hub, "alice");
        let (_b, mut rx_b) = connect(&hub, "bob");
        drain(&mut rx_a);
        drain(&mut rx_b);

        let task = json!({"_id": "t1", "title": "Write report"});
        hub.task_created(task.clone(), Some("alice"));

        assert_eq!(drain(&mut rx_a).len(), 0);
        assert_eq!(drain(&mut rx_b), vec![ServerFrame::TaskCreated { task }]);
    }

    #[test]
    fn task_updated_reaches_each_client_exactly_once() {
        let hub = SyncHub::new();
        let (_a, mut rx_a) = connect(&hub, "alice");
        let (_b, mut rx_b) = connect(&hub, "bob");
        hub.join_room("alice", "task-1");
        drain(&mut rx_a);
        drain(&mut rx_b);

        let task = json!({"_id": "task-1", "title": "Write report"});
        let changes = json!({"status": "in-progress"});
        hub.task_updated("task-1", task.clone(), changes.clone(), None);

        // Room member gets one copy despite also matching the global fan-out
        let expected = ServerFrame::TaskUpdated { task, changes };
        assert_eq!(drain(&mut rx_a), vec![expected.clone()]);
        assert_eq!(drain(&mut rx_b), vec![expected]);
    }

    #[test]
    fn task_updated_never_reaches_the_excluded_user() {
        let hub = SyncHub::new();
        let (_a, mut rx_a) = connect(&hub, "alice");
        let (_b, mut rx_b) = connect(&hub, "bob");
        hub.join_room("alice", "task-1");
        drain(&mut rx_a);
        drain(&mut rx_b);

        hub.task_updated("task-1", json!({}), json!({}), Some("alice"));

        assert_eq!(
            drain(&mut rx_a).len(),
            0,
            "room membership must not defeat exclusion"
        );
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[test]
    fn task_deleted_fans_out_with_dedup_and_exclusion() {
        let hub = SyncHub::new();
        let (_a, mut rx_a) = connect(&hub, "alice");
        let (_b, mut rx_b) = connect(&hub, "bob");
        hub.join_room("bob", "task-1");
        drain(&mut rx_a);
        drain(&mut rx_b);

        hub.task_deleted("task-1", Some("alice"));

        assert_eq!(drain(&mut rx_a).len(), 0);
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerFrame::TaskDeleted {
                task_id: "task-1".to_string()
            }]
        );
    }

    #[test]
    fn comments_are_scoped_to_the_room() {
        let hub = SyncHub::new();
        let (_a, mut rx_a) = connect(&hub, "alice");
        let (_b, mut rx_b) = connect(&hub, "bob");
        hub.join_room("alice", "task-1");
        drain(&mut rx_a);
        drain(&mut rx_b);

        let comment = json!({"text": "Looks good", "author": "bob"});
        hub.comment_added("task-1", comment.clone(), Some("bob"));

        assert_eq!(
            drain(&mut rx_a),
            vec![ServerFrame::CommentAdded {
                task_id: "task-1".to_string(),
                comment,
            }]
        );
        assert_eq!(drain(&mut rx_b).len(), 0, "comments must not leave the room");
    }

    #[test]
    fn progress_updates_reach_everyone_including_the_actor() {
        let hub = SyncHub::new();
        let (_a, mut rx_a) = connect(&hub, "alice");
        let (_b, mut rx_b) = connect(&hub, "bob");
        drain(&mut rx_a);
        drain(&mut rx_b);

        hub.progress_updated("task-1", json!({"progress": 80, "updatedBy": "alice"}));

        for rx in [&mut rx_a, &mut rx_b] {
            let frames = drain(rx);
            match &frames[..] {
                [ServerFrame::TaskProgressUpdated { task_id, data }] => {
                    assert_eq!(task_id, "task-1");
                    assert_eq!(data["progress"], 80);
                }
                other => panic!("expected one progress frame, got {other:?}"),
            }
        }
    }

    #[test]
    fn notify_user_targets_one_user_and_stamps_a_timestamp() {
        let hub = SyncHub::new();
        let (_a, mut rx_a) = connect(&hub, "alice");
        let (_b, mut rx_b) = connect(&hub, "bob");
        drain(&mut rx_a);
        drain(&mut rx_b);

        hub.notify_user("alice", json!({"message": "Task assigned to you"}));
        hub.notify_user("offline-user", json!({"message": "dropped"}));

        let frames = drain(&mut rx_a);
        match &frames[..] {
            [ServerFrame::Notification { payload }] => {
                assert_eq!(payload["message"], "Task assigned to you");
                assert!(payload.contains_key("timestamp"));
            }
            other => panic!("expected one notification, got {other:?}"),
        }
        assert_eq!(drain(&mut rx_b).len(), 0);
    }

    #[test]
    fn set_status_rebroadcasts_presence() {
        let hub = SyncHub::new();
        let (_a, _rx_a) = connect(&hub, "alice");
        let (_b, mut rx_b) = connect(&hub, "bob");
        drain(&mut rx_b);

        hub.set_status("alice", "away");

        let frames = drain(&mut rx_b);
        match &frames[..] {
            [ServerFrame::ConnectedUsers { users, .. }] => {
                let alice = users.iter().find(|u| u.user.id == "alice").unwrap();
                assert_eq!(alice.status, "away");
            }
            other => panic!("expected one presence frame, got {other:?}"),
        }
        assert_eq!(
            hub.snapshot()
                .iter()
                .find(|u| u.user.id == "alice")
                .unwrap()
                .status,
            "away"
        );
    }

    #[test]
    fn dead_connections_are_reaped_during_broadcast() {
        let hub = SyncHub::new();
        let (_a, rx_a) = connect(&hub, "alice");
        let (_b, mut rx_b) = connect(&hub, "bob");
        hub.join_room("alice", "task-1");
        drop(rx_a);
        drain(&mut rx_b);

        hub.task_created(json!({"_id": "t2"}), None);

        let frames = drain(&mut rx_b);
        assert_eq!(
            count(&frames, |f| matches!(f, ServerFrame::TaskCreated { .. })),
            1,
            "delivery must continue past the failed connection"
        );
        assert!(
            frames
                .iter()
                .any(|f| matches!(f, ServerFrame::ConnectedUsers { count: 1, .. })),
            "presence must be rebroadcast without the dead connection"
        );
        assert!(!hub.is_user_online("alice"));
        assert_eq!(hub.stats().connected_users, 1);
        assert_eq!(hub.stats().active_task_rooms, 0);
        assert!(hub.snapshot().iter().all(|u| u.user.id != "alice"));
    }

    #[test]
    fn disconnect_prunes_rooms_and_updates_presence() {
        let hub = SyncHub::new();
        let (conn_a, _rx_a) = connect(&hub, "alice");
        let (_b, mut rx_b) = connect(&hub, "bob");
        hub.join_room("alice", "task-1");
        hub.join_room("bob", "task-1");
        drain(&mut rx_b);

        hub.disconnect("alice", conn_a);

        assert_eq!(hub.stats().connected_users, 1);
        assert_eq!(hub.stats().active_task_rooms, 1);
        let frames = drain(&mut rx_b);
        match &frames[..] {
            [ServerFrame::ConnectedUsers { users, count }] => {
                assert_eq!(*count, 1);
                assert_eq!(users[0].user.id, "bob");
            }
            other => panic!("expected one presence frame, got {other:?}"),
        }
    }
}
