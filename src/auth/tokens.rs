//! Token storage and management

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::models::User;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Stored access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: String,
    pub expires_at: Option<u64>,
}

impl StoredToken {
    pub fn new(token: String, expires_in_secs: Option<u64>) -> Self {
        let expires_at = expires_in_secs.map(|secs| now_secs() + secs);
        Self { token, expires_at }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            // Consider expired if less than 5 minutes remaining
            Some(exp) => now_secs() + 300 >= exp,
            None => false,
        }
    }
}

/// Access token plus the refresh token it was issued with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub refresh_token: Option<String>,
    pub access_token: StoredToken,
}

impl Credential {
    pub fn new(access_token: String, expires_in: Option<u64>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: StoredToken::new(access_token, expires_in),
            refresh_token,
        }
    }
}

/// The part of the session that survives a restart.
///
/// Loading and error status have no representation here, so a rehydrated
/// session always starts with them cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedSession {
    pub is_authenticated: bool,
    pub user: Option<User>,
}

impl PersistedSession {
    pub fn signed_in(user: User) -> Self {
        Self {
            user: Some(user),
            is_authenticated: true,
        }
    }
}

/// Token store trait for different storage backends.
///
/// Every write replaces the stored value as a whole.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the persisted session projection.
    async fn load(&self) -> Result<PersistedSession>;

    /// Replace the persisted session projection.
    async fn save(&self, session: &PersistedSession) -> Result<()>;

    async fn credential(&self) -> Result<Option<Credential>>;

    async fn set_credential(&self, credential: Credential) -> Result<()>;

    async fn clear_credential(&self) -> Result<()>;

    /// Name of this storage backend.
    fn name(&self) -> &str {
        "unknown"
    }
}
