//! Session store: persisted refresh-credential records.

use async_trait::async_trait;
use sqlx::{PgExecutor, PgPool};

use super::StoreError;
use crate::models::{NewSessionRecord, SessionRecord};
use crate::types::{AccountId, SessionId};

const SESSION_COLUMNS: &str = "id, account_id, token_hash, expires_at, created_at, \
     last_used_at, revoked, user_agent, ip_address";

/// Repository trait for session records, keyed by refresh-token hash.
///
/// Lookups only ever see live records; a record that is revoked or past its
/// expiry behaves as if it did not exist, except through `find_revoked`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, record: NewSessionRecord) -> Result<SessionRecord, StoreError>;

    /// Returns the record only if it is neither revoked nor expired.
    async fn find(&self, token_hash: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// Returns the record only if it has been revoked. Used to spot reuse of a
    /// rotated or logged-out refresh token.
    async fn find_revoked(&self, token_hash: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// Stamps `last_used_at`.
    async fn touch(&self, id: SessionId) -> Result<(), StoreError>;

    /// Returns whether a live record was revoked.
    async fn revoke(&self, token_hash: &str) -> Result<bool, StoreError>;

    /// Revokes every live record of the account, returning how many.
    async fn revoke_all(&self, account_id: AccountId) -> Result<u64, StoreError>;

    /// Atomically revokes the live record for `old_hash` and inserts `record`.
    /// Returns `None` without inserting when no live record matched, so of two
    /// concurrent rotations of the same token at most one succeeds.
    async fn rotate(
        &self,
        old_hash: &str,
        record: NewSessionRecord,
    ) -> Result<Option<SessionRecord>, StoreError>;

    /// Deletes expired or revoked records. Idempotent.
    async fn purge_expired_or_revoked(&self) -> Result<u64, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert_record<'e, E>(executor: E, record: NewSessionRecord) -> Result<SessionRecord, StoreError>
where
    E: PgExecutor<'e>,
{
    let query = format!(
        "INSERT INTO session_records \
             (id, account_id, token_hash, expires_at, user_agent, ip_address) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING {SESSION_COLUMNS}"
    );
    let created = sqlx::query_as::<_, SessionRecord>(&query)
        .bind(SessionId::new())
        .bind(record.account_id)
        .bind(&record.token_hash)
        .bind(record.expires_at)
        .bind(record.meta.user_agent.as_deref())
        .bind(record.meta.ip_address.as_deref())
        .fetch_one(executor)
        .await?;
    Ok(created)
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, record: NewSessionRecord) -> Result<SessionRecord, StoreError> {
        insert_record(&self.pool, record).await
    }

    async fn find(&self, token_hash: &str) -> Result<Option<SessionRecord>, StoreError> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM session_records \
             WHERE token_hash = $1 AND NOT revoked AND expires_at > NOW()"
        );
        let record = sqlx::query_as::<_, SessionRecord>(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn find_revoked(&self, token_hash: &str) -> Result<Option<SessionRecord>, StoreError> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM session_records WHERE token_hash = $1 AND revoked"
        );
        let record = sqlx::query_as::<_, SessionRecord>(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn touch(&self, id: SessionId) -> Result<(), StoreError> {
        sqlx::query("UPDATE session_records SET last_used_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn revoke(&self, token_hash: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE session_records SET revoked = TRUE WHERE token_hash = $1 AND NOT revoked",
        )
        .bind(token_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all(&self, account_id: AccountId) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE session_records SET revoked = TRUE WHERE account_id = $1 AND NOT revoked",
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn rotate(
        &self,
        old_hash: &str,
        record: NewSessionRecord,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let revoked = sqlx::query(
            "UPDATE session_records SET revoked = TRUE, last_used_at = NOW() \
             WHERE token_hash = $1 AND NOT revoked AND expires_at > NOW()",
        )
        .bind(old_hash)
        .execute(&mut *tx)
        .await?;

        if revoked.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let created = insert_record(&mut *tx, record).await?;
        tx.commit().await?;
        Ok(Some(created))
    }

    async fn purge_expired_or_revoked(&self) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM session_records WHERE revoked OR expires_at <= NOW()")
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
