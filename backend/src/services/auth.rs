//! Account and session lifecycle: register, login, refresh rotation, logout,
//! password change, and housekeeping.
//!
//! Every store call goes through [`AuthService::bounded`] so none of them can
//! hang a request past the configured store timeout.

use std::{future::Future, sync::Arc, time::Duration};

use crate::{
    error::AppError,
    models::{normalize_email, Account, ClientMeta, NewAccount, NewSessionRecord},
    repositories::{AccountRepository, SessionStore, StoreError},
    types::AccountId,
    utils::{
        clock::Clock,
        jwt::{hash_refresh_token, IssuedToken, TokenCodec},
        password::{check_strength, PasswordError, PasswordHasher, PasswordRule},
    },
};

/// Verified against when the email is unknown, so a miss costs one hash just
/// like a wrong password.
const TIMING_DUMMY_PASSWORD: &str = "timing-equalization-only";

#[derive(Debug, Clone, Copy)]
pub struct AuthPolicy {
    pub store_timeout: Duration,
    /// Revoke every session of an account when a revoked refresh token is
    /// presented again.
    pub refresh_reuse_revokes_all: bool,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_millis(3000),
            refresh_reuse_revokes_all: false,
        }
    }
}

/// An access/refresh pair handed to the client. The refresh secret is
/// persisted only as a hash.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub account: Account,
    pub tokens: SessionTokens,
}

#[derive(Clone)]
pub struct AuthService {
    accounts: Arc<dyn AccountRepository>,
    sessions: Arc<dyn SessionStore>,
    codec: TokenCodec,
    hasher: PasswordHasher,
    clock: Arc<dyn Clock>,
    policy: AuthPolicy,
    dummy_digest: Arc<str>,
}

impl AuthService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        sessions: Arc<dyn SessionStore>,
        codec: TokenCodec,
        hasher: PasswordHasher,
        clock: Arc<dyn Clock>,
        policy: AuthPolicy,
    ) -> Result<Self, PasswordError> {
        let dummy_digest = hasher.hash(TIMING_DUMMY_PASSWORD)?;
        Ok(Self {
            accounts,
            sessions,
            codec,
            hasher,
            clock,
            policy,
            dummy_digest: dummy_digest.into(),
        })
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        meta: ClientMeta,
    ) -> Result<AuthOutcome, AppError> {
        let email = normalize_email(email);
        check_strength(password).map_err(|rules| rule_errors("password", &rules))?;

        if self
            .bounded("find_account_by_email", self.accounts.find_by_email(&email))
            .await?
            .is_some()
        {
            return Err(AppError::Conflict);
        }

        let password_hash = self.hash_password(password).await?;
        let account = self
            .bounded(
                "create_account",
                self.accounts.create(NewAccount {
                    id: AccountId::new(),
                    email,
                    password_hash,
                    created_at: self.clock.now(),
                }),
            )
            .await?;

        tracing::info!(account_id = %account.id, "account registered");
        self.open_session(account, meta).await
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        meta: ClientMeta,
    ) -> Result<AuthOutcome, AppError> {
        let email = normalize_email(email);
        let account = self
            .bounded("find_account_by_email", self.accounts.find_by_email(&email))
            .await?;

        let Some(account) = account else {
            let _ = self
                .verify_password(password, self.dummy_digest.to_string())
                .await;
            tracing::debug!("login rejected: unknown email");
            return Err(AppError::InvalidCredentials);
        };

        if !self
            .verify_password(password, account.password_hash.clone())
            .await?
        {
            tracing::debug!(account_id = %account.id, "login rejected: wrong password");
            return Err(AppError::InvalidCredentials);
        }
        if !account.is_active {
            tracing::debug!(account_id = %account.id, "login rejected: inactive account");
            return Err(AppError::InvalidCredentials);
        }

        self.open_session(account, meta).await
    }

    /// Exchanges a refresh token for a new pair and revokes the old one.
    ///
    /// Every way the presented token can be unacceptable yields
    /// `RefreshFailed`; only store faults surface as server errors.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        meta: ClientMeta,
    ) -> Result<SessionTokens, AppError> {
        let claims = self.codec.validate_refresh(refresh_token).map_err(|e| {
            tracing::debug!(error = %e, "refresh rejected: token validation");
            AppError::RefreshFailed
        })?;
        let account_id = claims.account_id().map_err(|_| AppError::RefreshFailed)?;

        let token_hash = hash_refresh_token(refresh_token);
        let Some(record) = self
            .bounded("find_session", self.sessions.find(&token_hash))
            .await?
        else {
            self.handle_unknown_refresh(&token_hash).await?;
            return Err(AppError::RefreshFailed);
        };

        if record.account_id != account_id {
            tracing::warn!(session_id = %record.id, "refresh rejected: subject mismatch");
            return Err(AppError::RefreshFailed);
        }
        self.bounded("touch_session", self.sessions.touch(record.id))
            .await?;

        let account = self
            .bounded("find_account_by_id", self.accounts.find_by_id(account_id))
            .await?
            .filter(|account| account.is_active)
            .ok_or_else(|| {
                tracing::debug!(%account_id, "refresh rejected: account missing or inactive");
                AppError::RefreshFailed
            })?;

        let tokens = self.issue_pair(&account)?;
        let rotated = self
            .bounded(
                "rotate_session",
                self.sessions
                    .rotate(&token_hash, self.new_record(&account, &tokens, meta)),
            )
            .await?;

        match rotated {
            Some(new_record) => {
                tracing::debug!(
                    old_session_id = %record.id,
                    new_session_id = %new_record.id,
                    "refresh token rotated"
                );
                Ok(tokens)
            }
            None => {
                tracing::debug!(session_id = %record.id, "refresh rejected: lost rotation race");
                Err(AppError::RefreshFailed)
            }
        }
    }

    /// Revokes the session behind `refresh_token`. Never fails: store faults
    /// are logged so the client can always clear its credentials.
    pub async fn logout(&self, refresh_token: Option<&str>) {
        let Some(token) = refresh_token.filter(|t| !t.is_empty()) else {
            return;
        };
        let token_hash = hash_refresh_token(token);
        match self
            .bounded("revoke_session", self.sessions.revoke(&token_hash))
            .await
        {
            Ok(true) => tracing::debug!("session revoked on logout"),
            Ok(false) => tracing::debug!("logout for unknown or already revoked session"),
            Err(err) => tracing::warn!(error = %err, "failed to revoke session on logout"),
        }
    }

    /// Replaces the password and revokes every session of the account.
    pub async fn change_password(
        &self,
        account_id: AccountId,
        current_password: &str,
        new_password: &str,
    ) -> Result<u64, AppError> {
        let account = self
            .bounded("find_account_by_id", self.accounts.find_by_id(account_id))
            .await?
            .ok_or(AppError::NotFound)?;

        if !self
            .verify_password(current_password, account.password_hash.clone())
            .await?
        {
            return Err(AppError::InvalidCredentials);
        }
        if new_password == current_password {
            return Err(AppError::Validation(vec![
                "newPassword: must differ from current password".to_string(),
            ]));
        }
        check_strength(new_password).map_err(|rules| rule_errors("newPassword", &rules))?;

        let password_hash = self.hash_password(new_password).await?;

        // Revoke first: the new digest is never stored while old sessions live.
        let revoked = self
            .bounded("revoke_all_sessions", self.sessions.revoke_all(account_id))
            .await?;
        let updated = self
            .bounded(
                "update_password",
                self.accounts
                    .update_password(account_id, &password_hash, self.clock.now()),
            )
            .await?;
        if !updated {
            return Err(AppError::NotFound);
        }

        tracing::info!(%account_id, revoked, "password changed, sessions revoked");
        Ok(revoked)
    }

    pub async fn profile(&self, account_id: AccountId) -> Result<Account, AppError> {
        self.bounded("find_account_by_id", self.accounts.find_by_id(account_id))
            .await?
            .ok_or(AppError::NotFound)
    }

    pub async fn purge_sessions(&self) -> Result<u64, StoreError> {
        self.bounded(
            "purge_sessions",
            self.sessions.purge_expired_or_revoked(),
        )
        .await
    }

    pub async fn ping_store(&self) -> Result<(), StoreError> {
        self.bounded("ping", self.accounts.ping()).await
    }

    async fn open_session(&self, account: Account, meta: ClientMeta) -> Result<AuthOutcome, AppError> {
        let tokens = self.issue_pair(&account)?;
        self.bounded(
            "create_session",
            self.sessions.create(self.new_record(&account, &tokens, meta)),
        )
        .await?;

        let now = self.clock.now();
        self.bounded("record_login", self.accounts.record_login(account.id, now))
            .await?;

        Ok(AuthOutcome {
            account: Account {
                last_login_at: Some(now),
                ..account
            },
            tokens,
        })
    }

    fn issue_pair(&self, account: &Account) -> Result<SessionTokens, AppError> {
        Ok(SessionTokens {
            access: self.codec.issue_access(account.id, &account.email)?,
            refresh: self.codec.issue_refresh(account.id)?,
        })
    }

    fn new_record(&self, account: &Account, tokens: &SessionTokens, meta: ClientMeta) -> NewSessionRecord {
        NewSessionRecord {
            account_id: account.id,
            token_hash: hash_refresh_token(&tokens.refresh.token),
            expires_at: tokens.refresh.expires_at,
            meta,
        }
    }

    async fn handle_unknown_refresh(&self, token_hash: &str) -> Result<(), AppError> {
        let revoked = self
            .bounded("find_revoked_session", self.sessions.find_revoked(token_hash))
            .await?;
        let Some(record) = revoked else {
            tracing::debug!("refresh rejected: no session for token");
            return Ok(());
        };

        tracing::warn!(
            account_id = %record.account_id,
            session_id = %record.id,
            "revoked refresh token presented again"
        );
        if self.policy.refresh_reuse_revokes_all {
            let revoked = self
                .bounded(
                    "revoke_all_sessions",
                    self.sessions.revoke_all(record.account_id),
                )
                .await?;
            tracing::warn!(account_id = %record.account_id, revoked, "all sessions revoked after token reuse");
        }
        Ok(())
    }

    async fn hash_password(&self, password: &str) -> Result<String, AppError> {
        let hasher = self.hasher.clone();
        let password = password.to_owned();
        let digest = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AppError::ServerError(e.into()))??;
        Ok(digest)
    }

    async fn verify_password(&self, password: &str, digest: String) -> Result<bool, AppError> {
        let hasher = self.hasher.clone();
        let password = password.to_owned();
        let matches = tokio::task::spawn_blocking(move || hasher.verify(&password, &digest))
            .await
            .map_err(|e| AppError::ServerError(e.into()))??;
        Ok(matches)
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.policy.store_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                if !matches!(err, StoreError::Conflict) {
                    tracing::error!(operation, error = %err, "store call failed");
                }
                Err(err)
            }
            Err(_) => {
                tracing::error!(operation, timeout = ?self.policy.store_timeout, "store call timed out");
                Err(StoreError::Timeout)
            }
        }
    }
}

fn rule_errors(field: &str, rules: &[PasswordRule]) -> AppError {
    AppError::Validation(
        rules
            .iter()
            .map(|rule| format!("{}: {}", field, rule.message()))
            .collect(),
    )
}
