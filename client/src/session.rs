use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration as StdDuration,
};

use crate::{
    api::{Account, AuthTransport, HttpTransport},
    clock::{Clock, SystemClock},
    error::ClientError,
    storage::{CredentialStore, Credentials},
};

type RefreshFlight = Shared<BoxFuture<'static, Result<Credentials, ClientError>>>;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Refresh proactively once the access token expires within this window.
    pub refresh_buffer: Duration,
    /// Upper bound on one refresh round-trip.
    pub refresh_timeout: StdDuration,
    /// Per-request timeout for `HttpTransport` built by `connect`.
    pub request_timeout: StdDuration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_buffer: Duration::minutes(5),
            refresh_timeout: StdDuration::from_secs(10),
            request_timeout: StdDuration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated { expires_at: DateTime<Utc> },
    Refreshing,
}

/// Owns the local session. Cheap to clone; clones share credentials and the
/// in-flight refresh.
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn AuthTransport>,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    in_flight: Mutex<Option<RefreshFlight>>,
    /// Bumped whenever the stored session is replaced or cleared outside a
    /// refresh. A refresh that started under an older epoch never writes.
    epoch: Mutex<u64>,
}

impl SessionClient {
    pub fn new(
        transport: Arc<dyn AuthTransport>,
        store: Arc<dyn CredentialStore>,
        config: SessionConfig,
    ) -> Self {
        Self::with_clock(transport, store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        transport: Arc<dyn AuthTransport>,
        store: Arc<dyn CredentialStore>,
        config: SessionConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                clock,
                config,
                in_flight: Mutex::new(None),
                epoch: Mutex::new(0),
            }),
        }
    }

    /// Client talking HTTP to `base_url`.
    pub fn connect(
        base_url: impl Into<String>,
        store: Arc<dyn CredentialStore>,
        config: SessionConfig,
    ) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(base_url, config.request_timeout)?;
        Ok(Self::new(Arc::new(transport), store, config))
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Account, ClientError> {
        let response = self.inner.transport.login(email, password).await?;
        let (credentials, account) = response.into_parts();
        self.inner.replace_session(Some(&credentials))?;
        log::info!("Signed in as {}", account.email);
        Ok(account)
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<Account, ClientError> {
        let response = self.inner.transport.register(email, password).await?;
        let (credentials, account) = response.into_parts();
        self.inner.replace_session(Some(&credentials))?;
        log::info!("Registered {}", account.email);
        Ok(account)
    }

    /// Clears local credentials, then tells the server. A refresh in flight
    /// is awaited first so the refresh token revoked is the one it minted.
    /// A server failure is logged and never blocks the local sign-out.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let pending = lock(&self.inner.in_flight).clone();
        if let Some(flight) = pending {
            if let Err(err) = flight.await {
                log::debug!("Refresh in flight at logout failed: {}", err);
            }
        }
        let current = self.inner.store.get().ok().flatten();
        self.inner.replace_session(None)?;
        if let Some(credentials) = current {
            if let Err(err) = self.inner.transport.logout(&credentials.refresh_token).await {
                log::warn!("Server-side logout failed: {}", err);
            }
        }
        Ok(())
    }

    pub fn current_state(&self) -> SessionState {
        if lock(&self.inner.in_flight).is_some() {
            return SessionState::Refreshing;
        }
        match self.inner.store.get() {
            Ok(Some(credentials)) => SessionState::Authenticated {
                expires_at: credentials.expires_at,
            },
            _ => SessionState::Unauthenticated,
        }
    }

    /// Access token for the next call, refreshed first when it is inside the
    /// buffer window.
    pub async fn access_token(&self) -> Result<String, ClientError> {
        let credentials = self
            .inner
            .store
            .get()?
            .ok_or(ClientError::Unauthenticated)?;
        if credentials.expires_within(self.inner.clock.now(), self.inner.config.refresh_buffer) {
            log::debug!("Access token near expiry, refreshing");
            let fresh = self.refresh_after(Some(&credentials.access_token)).await?;
            return Ok(fresh.access_token);
        }
        Ok(credentials.access_token)
    }

    /// Forces a refresh, joining one already in flight.
    pub async fn refresh(&self) -> Result<Credentials, ClientError> {
        self.refresh_after(None).await
    }

    /// Runs `op` with a fresh access token. An `Unauthorized` result triggers
    /// one refresh and one retry; a second `Unauthorized` ends the session.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, ClientError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let token = self.access_token().await?;
        match op(token.clone()).await {
            Err(ClientError::Unauthorized) => {}
            other => return other,
        }

        log::debug!("Access token rejected, refreshing once before retry");
        let fresh = self.refresh_after(Some(&token)).await?;
        match op(fresh.access_token).await {
            Err(ClientError::Unauthorized) => {
                log::warn!("Access token rejected after refresh, clearing session");
                self.clear_local();
                Err(ClientError::SessionExpired)
            }
            other => other,
        }
    }

    /// The server revokes every session on success, so the local one goes too.
    pub async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), ClientError> {
        let transport = &self.inner.transport;
        self.execute(move |token| async move {
            transport
                .change_password(&token, current_password, new_password)
                .await
        })
        .await?;
        self.clear_local();
        Ok(())
    }

    pub async fn profile(&self) -> Result<Account, ClientError> {
        let transport = &self.inner.transport;
        self.execute(move |token| async move { transport.profile(&token).await })
            .await
    }

    /// Joins the in-flight refresh or starts one. `seen_access` is the token
    /// the caller found wanting; if the store already holds a different one,
    /// another caller refreshed in the meantime and that pair is returned.
    async fn refresh_after(&self, seen_access: Option<&str>) -> Result<Credentials, ClientError> {
        let flight = {
            let mut slot = lock(&self.inner.in_flight);
            match slot.as_ref() {
                Some(flight) => flight.clone(),
                None => {
                    let current = self
                        .inner
                        .store
                        .get()?
                        .ok_or(ClientError::Unauthenticated)?;
                    if seen_access.is_some_and(|seen| seen != current.access_token) {
                        return Ok(current);
                    }
                    let flight = self.start_flight();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    /// Must be called with the in-flight slot locked; the task clears the
    /// slot itself, so it cannot finish before the slot is filled.
    fn start_flight(&self) -> RefreshFlight {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let outcome = inner.run_refresh().await;
            *lock(&inner.in_flight) = None;
            outcome
        });
        async move {
            handle.await.unwrap_or_else(|err| {
                Err(ClientError::RefreshFailed(format!("refresh task failed: {err}")))
            })
        }
        .boxed()
        .shared()
    }

    fn clear_local(&self) {
        if let Err(err) = self.inner.replace_session(None) {
            log::warn!("Failed to clear stored credentials: {}", err);
        }
    }
}

impl Inner {
    fn replace_session(&self, credentials: Option<&Credentials>) -> Result<(), ClientError> {
        let mut epoch = lock(&self.epoch);
        *epoch += 1;
        match credentials {
            Some(credentials) => self.store.set(credentials),
            None => self.store.clear(),
        }
    }

    async fn run_refresh(&self) -> Result<Credentials, ClientError> {
        let started = *lock(&self.epoch);
        let current = self.store.get()?.ok_or(ClientError::Unauthenticated)?;
        let outcome = tokio::time::timeout(
            self.config.refresh_timeout,
            self.transport.refresh(&current.refresh_token),
        )
        .await;

        match outcome {
            Ok(Ok(tokens)) => {
                let credentials = Credentials::from(tokens);
                {
                    let epoch = lock(&self.epoch);
                    if *epoch != started {
                        log::info!("Session ended during refresh, discarding new credentials");
                        return Err(ClientError::Unauthenticated);
                    }
                    self.store.set(&credentials)?;
                }
                log::debug!("Session refreshed, expires at {}", credentials.expires_at);
                Ok(credentials)
            }
            Ok(Err(err)) if err.is_rejection() => {
                log::info!("Refresh rejected, signing out: {}", err);
                {
                    let epoch = lock(&self.epoch);
                    if *epoch == started {
                        if let Err(clear_err) = self.store.clear() {
                            log::warn!("Failed to clear stored credentials: {}", clear_err);
                        }
                    }
                }
                Err(ClientError::RefreshFailed(err.to_string()))
            }
            Ok(Err(err)) => {
                log::warn!("Refresh did not complete, keeping session: {}", err);
                Err(err)
            }
            Err(_) => {
                log::warn!("Refresh timed out after {:?}", self.config.refresh_timeout);
                Err(ClientError::Timeout)
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}
