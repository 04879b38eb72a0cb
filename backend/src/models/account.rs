//! Account records: the identity anchor every session hangs off.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::fmt;

use crate::types::AccountId;

#[derive(Clone, FromRow)]
/// Database representation of an account. The password digest is never
/// serialized and is redacted from `Debug` output.
pub struct Account {
    pub id: AccountId,
    /// Stored lowercase; uniqueness is enforced on `lower(email)`.
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last successful login or registration.
    pub last_login_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("password_hash", &"<redacted>")
            .field("is_active", &self.is_active)
            .field("email_verified", &self.email_verified)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .field("last_login_at", &self.last_login_at)
            .finish()
    }
}

/// Insert payload for a new account. `email` must already be normalized.
#[derive(Clone)]
pub struct NewAccount {
    pub id: AccountId,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn from_new(new: NewAccount) -> Self {
        Self {
            id: new.id,
            email: new.email,
            password_hash: new.password_hash,
            is_active: true,
            email_verified: false,
            created_at: new.created_at,
            updated_at: new.created_at,
            last_login_at: None,
        }
    }
}

/// Trims and lowercases an email so lookups are case-insensitive.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
