use async_trait::async_trait;
use chrono::{Duration, Utc};
use sessionkeeper_client::{
    api::{Account, AuthResponse, TokenResponse},
    AuthTransport, ClientError, Clock, CredentialStore, Credentials, ManualClock,
    MemoryCredentialStore, SessionClient, SessionConfig, SessionState,
};
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration as StdDuration,
};

#[derive(Clone)]
enum RefreshScript {
    Rotate,
    Reject,
    Unreachable,
}

/// In-process stand-in for the server. Counts calls and only accepts access
/// tokens it minted itself.
struct ScriptedTransport {
    clock: Arc<ManualClock>,
    refresh_delay: StdDuration,
    refresh_script: Mutex<RefreshScript>,
    accepted: Mutex<HashSet<String>>,
    reject_every_access: bool,
    logout_fails: bool,
    revoked: Mutex<Vec<String>>,
    refresh_calls: AtomicUsize,
    profile_calls: AtomicUsize,
    logout_calls: AtomicUsize,
}

impl ScriptedTransport {
    fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            refresh_delay: StdDuration::from_millis(0),
            refresh_script: Mutex::new(RefreshScript::Rotate),
            accepted: Mutex::new(HashSet::new()),
            reject_every_access: false,
            logout_fails: false,
            revoked: Mutex::new(Vec::new()),
            refresh_calls: AtomicUsize::new(0),
            profile_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
        }
    }

    fn with_delay(mut self, delay: StdDuration) -> Self {
        self.refresh_delay = delay;
        self
    }

    fn with_script(self, script: RefreshScript) -> Self {
        *self.refresh_script.lock().unwrap() = script;
        self
    }

    fn accept(&self, token: &str) {
        self.accepted.lock().unwrap().insert(token.to_string());
    }

    fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    fn account(&self) -> Account {
        Account {
            id: "8d6f6a3e-2b7a-4f55-9a43-8fd1c7a1b0e2".into(),
            email: "lee@example.com".into(),
            is_active: true,
            email_verified: false,
            created_at: self.clock.now(),
            last_login_at: None,
        }
    }

    fn auth_response(&self, tag: &str) -> AuthResponse {
        let access = format!("access-{tag}");
        self.accept(&access);
        AuthResponse {
            access_token: access,
            refresh_token: format!("refresh-{tag}"),
            expires_at: self.clock.now() + Duration::minutes(15),
            account: self.account(),
        }
    }
}

#[async_trait]
impl AuthTransport for ScriptedTransport {
    async fn register(&self, _email: &str, _password: &str) -> Result<AuthResponse, ClientError> {
        Ok(self.auth_response("registered"))
    }

    async fn login(&self, _email: &str, password: &str) -> Result<AuthResponse, ClientError> {
        if password != "Correct-horse1!" {
            return Err(ClientError::Api {
                status: 401,
                code: "INVALID_CREDENTIALS".into(),
                message: "invalid email or password".into(),
            });
        }
        Ok(self.auth_response("login"))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenResponse, ClientError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.refresh_delay).await;
        let script = self.refresh_script.lock().unwrap().clone();
        match script {
            RefreshScript::Rotate => {
                let access = format!("access-{n}");
                self.accept(&access);
                Ok(TokenResponse {
                    access_token: access,
                    refresh_token: format!("refresh-{n}"),
                    expires_at: self.clock.now() + Duration::minutes(15),
                })
            }
            RefreshScript::Reject => Err(ClientError::Api {
                status: 401,
                code: "SESSION_EXPIRED".into(),
                message: "session expired, please sign in again".into(),
            }),
            RefreshScript::Unreachable => Err(ClientError::Transport("connection refused".into())),
        }
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), ClientError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.revoked.lock().unwrap().push(refresh_token.to_string());
        if self.logout_fails {
            return Err(ClientError::Transport("connection reset".into()));
        }
        Ok(())
    }

    async fn change_password(
        &self,
        access_token: &str,
        _current_password: &str,
        _new_password: &str,
    ) -> Result<(), ClientError> {
        if !self.accepted.lock().unwrap().contains(access_token) {
            return Err(ClientError::Unauthorized);
        }
        self.accepted.lock().unwrap().clear();
        Ok(())
    }

    async fn profile(&self, access_token: &str) -> Result<Account, ClientError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_every_access || !self.accepted.lock().unwrap().contains(access_token) {
            return Err(ClientError::Unauthorized);
        }
        Ok(self.account())
    }
}

struct Harness {
    client: SessionClient,
    transport: Arc<ScriptedTransport>,
    store: Arc<MemoryCredentialStore>,
}

fn stored(clock: &ManualClock, expires_in: Duration) -> Credentials {
    Credentials {
        access_token: "access-0".into(),
        refresh_token: "refresh-0".into(),
        expires_at: clock.now() + expires_in,
    }
}

fn harness(
    build: impl FnOnce(ScriptedTransport) -> ScriptedTransport,
    expires_in: Option<Duration>,
    config: SessionConfig,
) -> Harness {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let transport = Arc::new(build(ScriptedTransport::new(clock.clone())));
    let store = Arc::new(match expires_in {
        Some(ttl) => MemoryCredentialStore::with(stored(&clock, ttl)),
        None => MemoryCredentialStore::new(),
    });
    let client = SessionClient::with_clock(transport.clone(), store.clone(), config, clock);
    Harness {
        client,
        transport,
        store,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fifty_concurrent_callers_share_one_refresh() {
    let h = harness(
        |t| t.with_delay(StdDuration::from_millis(100)),
        Some(Duration::minutes(1)),
        SessionConfig::default(),
    );

    let callers: Vec<_> = (0..50)
        .map(|_| {
            let client = h.client.clone();
            tokio::spawn(async move { client.access_token().await })
        })
        .collect();

    let mut tokens = Vec::new();
    for caller in callers {
        tokens.push(caller.await.unwrap().unwrap());
    }

    assert_eq!(h.transport.refreshes(), 1);
    assert!(tokens.iter().all(|token| token == "access-1"));
    let creds = h.store.get().unwrap().unwrap();
    assert_eq!(creds.access_token, "access-1");
    assert_eq!(creds.refresh_token, "refresh-1");
}

#[tokio::test]
async fn token_outside_buffer_is_used_as_is() {
    let h = harness(|t| t, Some(Duration::minutes(30)), SessionConfig::default());
    assert_eq!(h.client.access_token().await.unwrap(), "access-0");
    assert_eq!(h.transport.refreshes(), 0);
}

#[tokio::test]
async fn abandoned_refresh_still_updates_the_store() {
    let h = harness(
        |t| t.with_delay(StdDuration::from_millis(100)),
        Some(Duration::minutes(1)),
        SessionConfig::default(),
    );

    let client = h.client.clone();
    let caller = tokio::spawn(async move { client.refresh().await });
    tokio::time::sleep(StdDuration::from_millis(20)).await;
    assert_eq!(h.client.current_state(), SessionState::Refreshing);
    caller.abort();

    tokio::time::sleep(StdDuration::from_millis(250)).await;
    assert_eq!(h.transport.refreshes(), 1);
    assert_eq!(h.store.get().unwrap().unwrap().access_token, "access-1");
    assert!(matches!(
        h.client.current_state(),
        SessionState::Authenticated { .. }
    ));
}

#[tokio::test]
async fn rejected_call_refreshes_once_and_retries() {
    // access-0 is fresh by the clock but unknown to the server
    let h = harness(|t| t, Some(Duration::minutes(30)), SessionConfig::default());

    let account = h.client.profile().await.unwrap();
    assert_eq!(account.email, "lee@example.com");
    assert_eq!(h.transport.refreshes(), 1);
    assert_eq!(h.transport.profile_calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.store.get().unwrap().unwrap().access_token, "access-1");
}

#[tokio::test]
async fn second_rejection_is_terminal() {
    let h = harness(
        |mut t| {
            t.reject_every_access = true;
            t
        },
        Some(Duration::minutes(30)),
        SessionConfig::default(),
    );

    let err = h.client.profile().await.unwrap_err();
    assert_eq!(err, ClientError::SessionExpired);
    assert_eq!(h.transport.refreshes(), 1);
    assert_eq!(h.transport.profile_calls.load(Ordering::SeqCst), 2);
    assert!(h.store.get().unwrap().is_none());
    assert_eq!(h.client.current_state(), SessionState::Unauthenticated);
}

#[tokio::test]
async fn refresh_rejection_clears_the_session() {
    let h = harness(
        |t| t.with_script(RefreshScript::Reject),
        Some(Duration::minutes(1)),
        SessionConfig::default(),
    );

    let err = h.client.access_token().await.unwrap_err();
    assert!(matches!(err, ClientError::RefreshFailed(_)));
    assert!(h.store.get().unwrap().is_none());
    assert_eq!(
        h.client.access_token().await.unwrap_err(),
        ClientError::Unauthenticated
    );
}

#[tokio::test]
async fn unreachable_server_keeps_the_session() {
    let h = harness(
        |t| t.with_script(RefreshScript::Unreachable),
        Some(Duration::minutes(1)),
        SessionConfig::default(),
    );

    let err = h.client.access_token().await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
    assert_eq!(h.store.get().unwrap().unwrap().access_token, "access-0");
}

#[tokio::test]
async fn slow_refresh_times_out_without_signing_out() {
    let config = SessionConfig {
        refresh_timeout: StdDuration::from_millis(30),
        ..SessionConfig::default()
    };
    let h = harness(
        |t| t.with_delay(StdDuration::from_millis(300)),
        Some(Duration::minutes(1)),
        config,
    );

    assert_eq!(h.client.refresh().await.unwrap_err(), ClientError::Timeout);
    assert_eq!(h.store.get().unwrap().unwrap().access_token, "access-0");
    assert!(matches!(
        h.client.current_state(),
        SessionState::Authenticated { .. }
    ));
}

#[tokio::test]
async fn logout_clears_locally_even_when_server_fails() {
    let h = harness(
        |mut t| {
            t.logout_fails = true;
            t
        },
        Some(Duration::minutes(30)),
        SessionConfig::default(),
    );

    h.client.logout().await.unwrap();
    assert_eq!(h.transport.logout_calls.load(Ordering::SeqCst), 1);
    assert!(h.store.get().unwrap().is_none());
    assert_eq!(h.client.current_state(), SessionState::Unauthenticated);
}

#[tokio::test]
async fn logout_during_refresh_stays_signed_out() {
    let h = harness(
        |t| t.with_delay(StdDuration::from_millis(100)),
        Some(Duration::minutes(1)),
        SessionConfig::default(),
    );

    let client = h.client.clone();
    let flight = tokio::spawn(async move { client.refresh().await });
    tokio::time::sleep(StdDuration::from_millis(20)).await;
    h.client.logout().await.unwrap();

    assert!(flight.await.unwrap().is_ok());
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    assert!(h.store.get().unwrap().is_none());
    assert_eq!(h.client.current_state(), SessionState::Unauthenticated);
    assert_eq!(h.transport.refreshes(), 1);
    // the rotated token is the one left live on the server, so it is the one revoked
    assert_eq!(*h.transport.revoked.lock().unwrap(), vec!["refresh-1".to_string()]);
}

#[tokio::test]
async fn local_sign_out_discards_a_refresh_in_flight() {
    let h = harness(
        |t| t.with_delay(StdDuration::from_millis(100)),
        None,
        SessionConfig::default(),
    );
    h.client
        .register("lee@example.com", "Correct-horse1!")
        .await
        .unwrap();

    let client = h.client.clone();
    let flight = tokio::spawn(async move { client.refresh().await });
    tokio::time::sleep(StdDuration::from_millis(20)).await;
    h.client
        .change_password("Correct-horse1!", "Battery-staple2?")
        .await
        .unwrap();

    assert_eq!(
        flight.await.unwrap().unwrap_err(),
        ClientError::Unauthenticated
    );
    assert_eq!(h.transport.refreshes(), 1);
    assert!(h.store.get().unwrap().is_none());
    assert_eq!(h.client.current_state(), SessionState::Unauthenticated);
}

#[tokio::test]
async fn login_stores_credentials_and_failures_leave_none() {
    let h = harness(|t| t, None, SessionConfig::default());
    assert_eq!(h.client.current_state(), SessionState::Unauthenticated);
    assert_eq!(
        h.client.access_token().await.unwrap_err(),
        ClientError::Unauthenticated
    );

    let err = h.client.login("lee@example.com", "wrong").await.unwrap_err();
    assert!(err.is_rejection());
    assert!(h.store.get().unwrap().is_none());

    let account = h
        .client
        .login("lee@example.com", "Correct-horse1!")
        .await
        .unwrap();
    assert_eq!(account.email, "lee@example.com");
    assert_eq!(h.client.access_token().await.unwrap(), "access-login");
    assert!(matches!(
        h.client.current_state(),
        SessionState::Authenticated { .. }
    ));
}

#[tokio::test]
async fn change_password_signs_out_locally() {
    let h = harness(|t| t, None, SessionConfig::default());
    h.client
        .register("lee@example.com", "Correct-horse1!")
        .await
        .unwrap();

    h.client
        .change_password("Correct-horse1!", "Battery-staple2?")
        .await
        .unwrap();
    assert!(h.store.get().unwrap().is_none());
    assert_eq!(h.transport.refreshes(), 0);
}
