use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::types::{
    Account, ApiError, AuthResponse, ChangePasswordRequest, LoginRequest, LogoutRequest,
    RefreshRequest, RegisterRequest, TokenResponse,
};
use crate::error::ClientError;

/// Network side of the session client. `SessionClient` only ever talks to the
/// server through this trait, so tests can script it.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    async fn register(&self, email: &str, password: &str) -> Result<AuthResponse, ClientError>;
    async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ClientError>;
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ClientError>;
    async fn logout(&self, refresh_token: &str) -> Result<(), ClientError>;
    async fn change_password(
        &self,
        access_token: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), ClientError>;
    async fn profile(&self, access_token: &str) -> Result<Account, ClientError>;
}

pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// `timeout` bounds every request end to end.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = request.send().await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(error_from(response).await)
        }
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<(), ClientError> {
        let response = request.send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from(response).await)
        }
    }
}

/// A 401 about the access token becomes `Unauthorized` so the session client
/// knows a refresh may help. Every other failure keeps its status and code.
async fn error_from(response: Response) -> ClientError {
    let status = response.status();
    let body: Option<ApiError> = response.json().await.ok();
    let (code, message) = match body {
        Some(err) => (err.code, err.error),
        None => (
            String::new(),
            status.canonical_reason().unwrap_or("request failed").to_string(),
        ),
    };

    if status == StatusCode::UNAUTHORIZED && (code == "INVALID_TOKEN" || code == "UNAUTHORIZED") {
        return ClientError::Unauthorized;
    }
    ClientError::Api {
        status: status.as_u16(),
        code,
        message,
    }
}

#[async_trait]
impl AuthTransport for HttpTransport {
    async fn register(&self, email: &str, password: &str) -> Result<AuthResponse, ClientError> {
        let request = self
            .client
            .post(self.url("/auth/register"))
            .json(&RegisterRequest { email, password });
        self.send(request).await
    }

    async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ClientError> {
        let request = self
            .client
            .post(self.url("/auth/login"))
            .json(&LoginRequest { email, password });
        self.send(request).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ClientError> {
        let request = self
            .client
            .post(self.url("/auth/refresh"))
            .json(&RefreshRequest { refresh_token });
        self.send(request).await
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), ClientError> {
        let request = self
            .client
            .post(self.url("/auth/logout"))
            .json(&LogoutRequest { refresh_token });
        self.send_empty(request).await
    }

    async fn change_password(
        &self,
        access_token: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), ClientError> {
        let request = self
            .client
            .put(self.url("/api/v1/auth/change-password"))
            .bearer_auth(access_token)
            .json(&ChangePasswordRequest {
                current_password,
                new_password,
            });
        self.send_empty(request).await
    }

    async fn profile(&self, access_token: &str) -> Result<Account, ClientError> {
        let request = self
            .client
            .get(self.url("/api/v1/auth/profile"))
            .bearer_auth(access_token);
        self.send(request).await
    }
}
