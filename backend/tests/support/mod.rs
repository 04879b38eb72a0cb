#![allow(dead_code)]
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Duration;
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use sessionkeeper_backend::{
    config::Config,
    repositories::{InMemoryAccountRepository, InMemorySessionStore},
    routes,
    services::{AuthPolicy, AuthService},
    state::AppState,
    utils::{
        clock::ManualClock,
        jwt::{TokenCodec, TokenSettings},
        password::{HashParams, PasswordHasher},
    },
};

pub const TEST_SECRET: &str = "integration-test-secret-0123456789abcdef";

pub struct TestApp {
    pub router: Router,
    pub clock: Arc<ManualClock>,
    pub accounts: Arc<InMemoryAccountRepository>,
    pub sessions: Arc<InMemorySessionStore>,
}

pub fn token_settings() -> TokenSettings {
    TokenSettings {
        secret: TEST_SECRET.into(),
        issuer: "sessionkeeper".into(),
        audience: "sessionkeeper-api".into(),
        access_ttl: Duration::minutes(15),
        refresh_ttl: Duration::days(7),
    }
}

pub fn fast_hasher() -> PasswordHasher {
    PasswordHasher::new(HashParams {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    })
    .expect("hasher params")
}

pub fn test_app() -> TestApp {
    test_app_with_policy(AuthPolicy::default())
}

pub fn test_app_with_policy(policy: AuthPolicy) -> TestApp {
    let clock = Arc::new(ManualClock::default());
    let accounts = Arc::new(InMemoryAccountRepository::new());
    let sessions = Arc::new(InMemorySessionStore::new(clock.clone()));
    let auth = AuthService::new(
        accounts.clone(),
        sessions.clone(),
        TokenCodec::new(token_settings(), clock.clone()),
        fast_hasher(),
        clock.clone(),
        policy,
    )
    .expect("auth service");
    let config = Config {
        jwt_secret: TEST_SECRET.into(),
        ..Config::default()
    };

    TestApp {
        router: routes::router(AppState::new(config, auth)),
        clock,
        accounts,
        sessions,
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
}

impl TestApp {
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> Reply {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::USER_AGENT, "sessionkeeper-tests/1.0")
            .header("x-forwarded-for", "198.51.100.4");
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send_request(request).await
    }

    pub async fn send_request(&self, request: Request<Body>) -> Reply {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        Reply { status, body }
    }

    pub async fn post(&self, uri: &str, body: Value) -> Reply {
        self.send(Method::POST, uri, None, Some(body)).await
    }

    pub async fn get_authed(&self, uri: &str, token: &str) -> Reply {
        self.send(Method::GET, uri, Some(token), None).await
    }

    /// Registers an account and returns the auth response body.
    pub async fn register(&self, email: &str, password: &str) -> Value {
        let reply = self
            .post(
                "/auth/register",
                serde_json::json!({ "email": email, "password": password }),
            )
            .await;
        assert_eq!(reply.status, StatusCode::CREATED, "register: {}", reply.body);
        reply.body
    }
}

/// Connects to `TEST_DATABASE_URL` and runs migrations. `None` when the
/// variable is unset, in which case Postgres tests skip themselves.
pub async fn test_pool() -> Option<sqlx::PgPool> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .expect("connect to TEST_DATABASE_URL");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    Some(pool)
}
