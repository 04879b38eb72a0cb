//! In-memory stores. They follow the same liveness rules as the Postgres
//! implementations but read time from an injected clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

use super::{AccountRepository, SessionStore, StoreError};
use crate::models::{normalize_email, Account, NewAccount, NewSessionRecord, SessionRecord};
use crate::types::{AccountId, SessionId};
use crate::utils::clock::Clock;

pub struct InMemoryAccountRepository {
    accounts: RwLock<HashMap<AccountId, Account>>,
}

impl InMemoryAccountRepository {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// Flips the active flag. Accounts are otherwise never deactivated here.
    pub async fn set_active(&self, id: AccountId, active: bool) -> bool {
        match self.accounts.write().await.get_mut(&id) {
            Some(account) => {
                account.is_active = active;
                true
            }
            None => false,
        }
    }
}

impl Default for InMemoryAccountRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn create(&self, account: NewAccount) -> Result<Account, StoreError> {
        let mut accounts = self.accounts.write().await;
        let email = normalize_email(&account.email);
        if accounts.values().any(|existing| existing.email == email) {
            return Err(StoreError::Conflict);
        }
        let created = Account::from_new(NewAccount { email, ..account });
        accounts.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let email = normalize_email(email);
        let accounts = self.accounts.read().await;
        Ok(accounts.values().find(|a| a.email == email).cloned())
    }

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn update_password(
        &self,
        id: AccountId,
        password_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut accounts = self.accounts.write().await;
        match accounts.get_mut(&id) {
            Some(account) => {
                account.password_hash = password_hash.to_string();
                account.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_login(&self, id: AccountId, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(account) = self.accounts.write().await.get_mut(&id) {
            account.last_login_at = Some(at);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub struct InMemorySessionStore {
    records: RwLock<HashMap<SessionId, SessionRecord>>,
    clock: Arc<dyn Clock>,
}

impl InMemorySessionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// All records of an account, live or not. Test and diagnostics helper.
    pub async fn records_for(&self, account_id: AccountId) -> Vec<SessionRecord> {
        let mut records: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.account_id == account_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn build(&self, record: NewSessionRecord) -> SessionRecord {
        SessionRecord {
            id: SessionId::new(),
            account_id: record.account_id,
            token_hash: record.token_hash,
            expires_at: record.expires_at,
            created_at: self.clock.now(),
            last_used_at: None,
            revoked: false,
            user_agent: record.meta.user_agent,
            ip_address: record.meta.ip_address,
        }
    }
}

fn insert_unique(
    records: &mut HashMap<SessionId, SessionRecord>,
    record: SessionRecord,
) -> Result<SessionRecord, StoreError> {
    if records.values().any(|r| r.token_hash == record.token_hash) {
        return Err(StoreError::Conflict);
    }
    records.insert(record.id, record.clone());
    Ok(record)
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, record: NewSessionRecord) -> Result<SessionRecord, StoreError> {
        let record = self.build(record);
        insert_unique(&mut *self.records.write().await, record)
    }

    async fn find(&self, token_hash: &str) -> Result<Option<SessionRecord>, StoreError> {
        let now = self.clock.now();
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| r.token_hash == token_hash && r.is_live(now))
            .cloned())
    }

    async fn find_revoked(&self, token_hash: &str) -> Result<Option<SessionRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| r.token_hash == token_hash && r.revoked)
            .cloned())
    }

    async fn touch(&self, id: SessionId) -> Result<(), StoreError> {
        let now = self.clock.now();
        if let Some(record) = self.records.write().await.get_mut(&id) {
            record.last_used_at = Some(now);
        }
        Ok(())
    }

    async fn revoke(&self, token_hash: &str) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        match records
            .values_mut()
            .find(|r| r.token_hash == token_hash && !r.revoked)
        {
            Some(record) => {
                record.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_all(&self, account_id: AccountId) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let mut revoked = 0;
        for record in records
            .values_mut()
            .filter(|r| r.account_id == account_id && !r.revoked)
        {
            record.revoked = true;
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn rotate(
        &self,
        old_hash: &str,
        record: NewSessionRecord,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let now = self.clock.now();
        let replacement = self.build(record);
        let mut records = self.records.write().await;

        if records.values().any(|r| r.token_hash == replacement.token_hash) {
            return Err(StoreError::Conflict);
        }
        let Some(old) = records
            .values_mut()
            .find(|r| r.token_hash == old_hash && r.is_live(now))
        else {
            return Ok(None);
        };
        old.revoked = true;
        old.last_used_at = Some(now);

        insert_unique(&mut records, replacement).map(Some)
    }

    async fn purge_expired_or_revoked(&self) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.is_live(now));
        Ok((before - records.len()) as u64)
    }
}
