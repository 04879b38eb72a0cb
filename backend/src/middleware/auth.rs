//! The auth gate: bearer extraction, access-token validation, and the
//! identity guard handlers use to require a caller.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::{
    error::{AppError, GateRejection},
    state::AppState,
    types::AccountId,
    utils::jwt::TokenCodec,
};

const BEARER_SCHEME: &str = "Bearer";

/// Caller identity attached to request extensions once the gate passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthIdentity {
    pub account_id: AccountId,
    pub email: String,
    pub token_id: String,
}

/// Route layer for protected routes. Rejections render through `AppError`.
pub async fn auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = authenticate(request.headers(), state.auth.codec())?;
    tracing::debug!(account_id = %identity.account_id, "request authenticated");
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

pub fn authenticate(headers: &HeaderMap, codec: &TokenCodec) -> Result<AuthIdentity, AppError> {
    let raw = headers
        .get(header::AUTHORIZATION)
        .ok_or(AppError::Unauthorized(GateRejection::MissingHeader))?;
    let raw = raw
        .to_str()
        .map_err(|_| AppError::Unauthorized(GateRejection::InvalidFormat))?;
    let token = parse_bearer_token(raw).ok_or(AppError::Unauthorized(GateRejection::InvalidFormat))?;

    let claims = codec.validate_access(token)?;
    let account_id = claims.account_id()?;
    Ok(AuthIdentity {
        account_id,
        email: claims.email,
        token_id: claims.jti,
    })
}

/// Accepts exactly `Bearer <token>`: case-sensitive scheme, one space, and a
/// non-empty token after trimming.
pub fn parse_bearer_token(header: &str) -> Option<&str> {
    let (scheme, rest) = header.split_once(' ')?;
    if scheme != BEARER_SCHEME {
        return None;
    }
    let token = rest.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

impl<S> FromRequestParts<S> for AuthIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthIdentity>()
            .cloned()
            .ok_or(AppError::Unauthorized(GateRejection::MissingIdentity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{clock::ManualClock, jwt::TokenSettings};
    use axum::http::HeaderValue;
    use chrono::Duration;
    use std::sync::Arc;

    fn codec() -> TokenCodec {
        TokenCodec::new(
            TokenSettings {
                secret: "gate-test-secret-gate-test-secret-0".into(),
                issuer: "sessionkeeper".into(),
                audience: "sessionkeeper-api".into(),
                access_ttl: Duration::minutes(15),
                refresh_ttl: Duration::days(7),
            },
            Arc::new(ManualClock::default()),
        )
    }

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn parse_bearer_token_requires_exact_scheme() {
        assert_eq!(parse_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer_token("Bearer  abc "), Some("abc"));
        assert_eq!(parse_bearer_token("bearer abc"), None);
        assert_eq!(parse_bearer_token("Basic abc"), None);
        assert_eq!(parse_bearer_token("Bearer"), None);
        assert_eq!(parse_bearer_token("Bearer "), None);
        assert_eq!(parse_bearer_token("Bearerabc"), None);
        assert_eq!(parse_bearer_token(""), None);
    }

    #[test]
    fn missing_and_malformed_headers_are_distinct() {
        let codec = codec();
        assert!(matches!(
            authenticate(&HeaderMap::new(), &codec),
            Err(AppError::Unauthorized(GateRejection::MissingHeader))
        ));
        assert!(matches!(
            authenticate(&headers("Token abc"), &codec),
            Err(AppError::Unauthorized(GateRejection::InvalidFormat))
        ));
        assert!(matches!(
            authenticate(&headers("Bearer not-a-jwt"), &codec),
            Err(AppError::TokenInvalid)
        ));
    }

    #[test]
    fn valid_token_yields_identity() {
        let codec = codec();
        let account_id = AccountId::new();
        let issued = codec.issue_access(account_id, "kim@example.com").unwrap();
        let identity =
            authenticate(&headers(&format!("Bearer {}", issued.token)), &codec).unwrap();
        assert_eq!(identity.account_id, account_id);
        assert_eq!(identity.email, "kim@example.com");
        assert_eq!(identity.token_id, issued.token_id);
    }

    #[test]
    fn refresh_token_does_not_pass_the_gate() {
        let codec = codec();
        let issued = codec.issue_refresh(AccountId::new()).unwrap();
        assert!(matches!(
            authenticate(&headers(&format!("Bearer {}", issued.token)), &codec),
            Err(AppError::TokenInvalid)
        ));
    }
}
