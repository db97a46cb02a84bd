//! User identity: public profiles, the user directory, and handshake
//! verification.
//!
//! The sync server does not own user accounts. It consults a
//! `UserDirectory` during the WebSocket handshake; the bundled in-memory
//! implementation is seeded from a JSON file or populated by the embedding
//! application.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::auth::jwt;
use crate::error::AuthError;

/// Role assigned to a TaskBoard account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

/// Public view of a user, safe to embed in frames relayed to other clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Full directory record for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub avatar: Option<String>,
    /// Deactivated accounts keep their record but cannot connect.
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl UserRecord {
    /// Public profile derived from this record.
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
            avatar: self.avatar.clone(),
        }
    }
}

/// Source of user records consulted during the WebSocket handshake.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Look up a user by id. Returns None when no such account exists.
    async fn find_user(&self, user_id: &str) -> Option<UserRecord>;
}

/// In-memory user directory, seeded from a JSON file or upserted at runtime.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from a list of records.
    pub fn from_records(records: impl IntoIterator<Item = UserRecord>) -> Self {
        let users = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        Self {
            users: RwLock::new(users),
        }
    }

    /// Load a directory from a JSON file containing an array of user records.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let records: Vec<UserRecord> = serde_json::from_str(&raw)?;
        tracing::info!(
            users = records.len(),
            path = %path.as_ref().display(),
            "User directory loaded"
        );
        Ok(Self::from_records(records))
    }

    /// Insert or replace a record.
    pub fn upsert(&self, record: UserRecord) {
        self.users.write().insert(record.id.clone(), record);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_user(&self, user_id: &str) -> Option<UserRecord> {
        self.users.read().get(user_id).cloned()
    }
}

/// An authenticated connection identity produced by the handshake.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub profile: UserProfile,
}

/// Verifies handshake tokens against the signing key and the user directory.
pub struct IdentityResolver {
    secret: Vec<u8>,
    directory: Arc<dyn UserDirectory>,
}

impl IdentityResolver {
    pub fn new(secret: Vec<u8>, directory: Arc<dyn UserDirectory>) -> Self {
        Self { secret, directory }
    }

    /// Verify an access token and resolve it to a live user identity.
    /// Fails when the token is invalid, the user is unknown, or the
    /// account is deactivated.
    pub async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = jwt::validate_access_token(&self.secret, token)?;
        let record = self
            .directory
            .find_user(&claims.sub)
            .await
            .ok_or(AuthError::UnknownUser)?;
        if !record.is_active {
            return Err(AuthError::InactiveUser);
        }
        Ok(Identity {
            user_id: record.id.clone(),
            profile: record.profile(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn record(id: &str, is_active: bool) -> UserRecord {
        UserRecord {
            id: id.to_string(),
            name: format!("User {id}"),
            email: format!("{id}@example.com"),
            role: Role::Member,
            avatar: None,
            is_active,
        }
    }

    fn resolver_with(records: Vec<UserRecord>) -> (IdentityResolver, Vec<u8>) {
        let secret: [u8; 32] = rand::rng().random();
        let directory = Arc::new(InMemoryUserDirectory::from_records(records));
        (
            IdentityResolver::new(secret.to_vec(), directory),
            secret.to_vec(),
        )
    }

    #[tokio::test]
    async fn resolves_active_user() {
        let (resolver, secret) = resolver_with(vec![record("alice", true)]);
        let token = jwt::issue_access_token(&secret, "alice").unwrap();
        let identity = resolver.verify(&token).await.unwrap();
        assert_eq!(identity.user_id, "alice");
        assert_eq!(identity.profile.name, "User alice");
    }

    #[tokio::test]
    async fn rejects_unknown_user() {
        let (resolver, secret) = resolver_with(vec![record("alice", true)]);
        let token = jwt::issue_access_token(&secret, "mallory").unwrap();
        assert!(matches!(
            resolver.verify(&token).await,
            Err(AuthError::UnknownUser)
        ));
    }

    #[tokio::test]
    async fn rejects_inactive_user() {
        let (resolver, secret) = resolver_with(vec![record("carol", false)]);
        let token = jwt::issue_access_token(&secret, "carol").unwrap();
        assert!(matches!(
            resolver.verify(&token).await,
            Err(AuthError::InactiveUser)
        ));
    }

    #[tokio::test]
    async fn rejects_garbage_token() {
        let (resolver, _secret) = resolver_with(vec![record("alice", true)]);
        assert!(matches!(
            resolver.verify("not-a-jwt").await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn directory_json_parsing_defaults_is_active() {
        let raw = r#"[
            {"id": "u1", "name": "Ann", "email": "ann@example.com", "role": "admin"},
            {"id": "u2", "name": "Ben", "email": "ben@example.com", "role": "member",
             "avatar": "https://cdn.example.com/ben.png", "is_active": false}
        ]"#;
        let records: Vec<UserRecord> = serde_json::from_str(raw).unwrap();
        assert_eq!(records[0].role, Role::Admin);
        assert!(records[0].is_active);
        assert!(!records[1].is_active);
        assert_eq!(
            records[1].avatar.as_deref(),
            Some("https://cdn.example.com/ben.png")
        );
    }

    #[test]
    fn profile_serialization_omits_missing_avatar() {
        let profile = record("alice", true).profile();
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["id"], "alice");
        assert_eq!(json["role"], "member");
        assert!(json.get("avatar").is_none());
    }
}
