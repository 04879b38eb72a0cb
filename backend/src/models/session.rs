//! Session records: one persisted refresh credential per device or login.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::{AccountId, SessionId};

#[derive(Debug, Clone, FromRow)]
pub struct SessionRecord {
    pub id: SessionId,
    pub account_id: AccountId,
    /// SHA-256 of the refresh secret; the secret itself is never stored.
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl SessionRecord {
    /// Live means neither revoked nor past its expiry.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}

#[derive(Debug, Clone)]
pub struct NewSessionRecord {
    pub account_id: AccountId,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub meta: ClientMeta,
}

/// Device metadata captured from the request that opened a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMeta {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}
