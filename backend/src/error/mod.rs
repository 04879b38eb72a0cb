use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::repositories::StoreError;
use crate::utils::{jwt::TokenError, password::PasswordError};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Why the auth gate turned a request away before looking at the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    MissingHeader,
    InvalidFormat,
    /// A handler asked for an identity the gate never attached.
    MissingIdentity,
}

impl GateRejection {
    pub fn message(&self) -> &'static str {
        match self {
            GateRejection::MissingHeader => "authorization header required",
            GateRejection::InvalidFormat => {
                "invalid authorization header format, expected: Bearer <token>"
            }
            GateRejection::MissingIdentity => "authentication required",
        }
    }
}

impl fmt::Display for GateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug)]
pub enum AppError {
    InvalidCredentials,
    TokenExpired,
    TokenInvalid,
    RefreshFailed,
    Validation(Vec<String>),
    Unauthorized(GateRejection),
    /// Rendered exactly like `InvalidCredentials`.
    NotFound,
    Conflict,
    ServerError(anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidCredentials
            | AppError::NotFound
            | AppError::TokenExpired
            | AppError::TokenInvalid
            | AppError::RefreshFailed
            | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict => StatusCode::CONFLICT,
            AppError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidCredentials | AppError::NotFound => "INVALID_CREDENTIALS",
            AppError::TokenExpired | AppError::TokenInvalid => "INVALID_TOKEN",
            AppError::RefreshFailed => "SESSION_EXPIRED",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Conflict => "CONFLICT",
            AppError::ServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn public_message(&self) -> &'static str {
        match self {
            AppError::InvalidCredentials | AppError::NotFound => "invalid email or password",
            AppError::TokenExpired | AppError::TokenInvalid => "invalid or expired token",
            AppError::RefreshFailed => "session expired, please sign in again",
            AppError::Validation(_) => "validation failed",
            AppError::Unauthorized(rejection) => rejection.message(),
            AppError::Conflict => "account already exists",
            AppError::ServerError(_) => "internal server error",
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::ServerError(err) => write!(f, "internal server error: {err}"),
            other => f.write_str(other.public_message()),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = self.public_message();

        let details = match self {
            AppError::Validation(errors) => Some(serde_json::json!({ "errors": errors })),
            AppError::ServerError(err) => {
                tracing::error!("Internal server error: {:?}", err);
                None
            }
            _ => None,
        };

        let body = Json(ErrorResponse {
            error: message.to_string(),
            code: code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::ServerError(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => AppError::Conflict,
            other => AppError::ServerError(other.into()),
        }
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AppError::TokenExpired,
            TokenError::Invalid => AppError::TokenInvalid,
            TokenError::Signing(msg) => AppError::ServerError(anyhow::anyhow!(msg)),
        }
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self {
        AppError::ServerError(err.into())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(message) => format!("{}: {}", field, message),
                    None => format!("{}: {}", field, e.code),
                })
            })
            .collect();
        messages.sort();
        AppError::Validation(messages)
    }
}
