use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{fmt, sync::Arc};
use thiserror::Error;
use uuid::Uuid;

use crate::{types::AccountId, utils::clock::Clock};

const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token invalid")]
    Invalid,
    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Distinguishes access from refresh tokens so one can never stand in for the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenUse {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub email: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
    pub typ: TokenUse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
    pub typ: TokenUse,
}

trait TimedClaims {
    fn exp(&self) -> i64;
    fn nbf(&self) -> i64;
    fn token_use(&self) -> TokenUse;
}

impl TimedClaims for AccessClaims {
    fn exp(&self) -> i64 {
        self.exp
    }
    fn nbf(&self) -> i64 {
        self.nbf
    }
    fn token_use(&self) -> TokenUse {
        self.typ
    }
}

impl TimedClaims for RefreshClaims {
    fn exp(&self) -> i64 {
        self.exp
    }
    fn nbf(&self) -> i64 {
        self.nbf
    }
    fn token_use(&self) -> TokenUse {
        self.typ
    }
}

impl AccessClaims {
    pub fn account_id(&self) -> Result<AccountId, TokenError> {
        self.sub.parse().map_err(|_| TokenError::Invalid)
    }
}

impl RefreshClaims {
    pub fn account_id(&self) -> Result<AccountId, TokenError> {
        self.sub.parse().map_err(|_| TokenError::Invalid)
    }
}

/// A freshly minted token. `token` is the only copy of the secret.
#[derive(Clone)]
pub struct IssuedToken {
    pub token: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"<redacted>")
            .field("token_id", &self.token_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Clone)]
pub struct TokenSettings {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl fmt::Debug for TokenSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSettings")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

/// Mints and validates HS256 access and refresh tokens.
///
/// The codec is pure: it never touches the session store. Expiry and
/// not-before are checked against the injected clock, not the system time.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(settings: TokenSettings, clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        // Time checks run against `clock` in `check_times`.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_issuer(&[settings.issuer.as_str()]);
        validation.set_audience(&[settings.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(settings.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(settings.secret.as_bytes()),
            validation,
            issuer: settings.issuer,
            audience: settings.audience,
            access_ttl: settings.access_ttl,
            refresh_ttl: settings.refresh_ttl,
            clock,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn issue_access(&self, account_id: AccountId, email: &str) -> Result<IssuedToken, TokenError> {
        let now = self.clock.now();
        let expires_at = now + self.access_ttl;
        let claims = AccessClaims {
            sub: account_id.to_string(),
            email: email.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
            typ: TokenUse::Access,
        };
        let token_id = claims.jti.clone();
        let token = self.sign(&claims)?;

        Ok(IssuedToken {
            token,
            token_id,
            expires_at: truncate_to_seconds(expires_at),
        })
    }

    pub fn issue_refresh(&self, account_id: AccountId) -> Result<IssuedToken, TokenError> {
        let now = self.clock.now();
        let expires_at = now + self.refresh_ttl;
        let claims = RefreshClaims {
            sub: account_id.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
            typ: TokenUse::Refresh,
        };
        let token_id = claims.jti.clone();
        let token = self.sign(&claims)?;

        Ok(IssuedToken {
            token,
            token_id,
            expires_at: truncate_to_seconds(expires_at),
        })
    }

    pub fn validate_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        self.validate::<AccessClaims>(token, TokenUse::Access)
    }

    pub fn validate_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        self.validate::<RefreshClaims>(token, TokenUse::Refresh)
    }

    pub fn extract_account_id(&self, refresh_token: &str) -> Result<AccountId, TokenError> {
        self.validate_refresh(refresh_token)?.account_id()
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, TokenError> {
        encode(&Header::new(SIGNING_ALGORITHM), claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    fn validate<T>(&self, token: &str, expected: TokenUse) -> Result<T, TokenError>
    where
        T: DeserializeOwned + TimedClaims,
    {
        let data = decode::<T>(token, &self.decoding_key, &self.validation).map_err(|e| {
            let reason = match e.kind() {
                ErrorKind::InvalidSignature => "signature",
                ErrorKind::InvalidAlgorithm => "algorithm",
                ErrorKind::InvalidIssuer => "issuer",
                ErrorKind::InvalidAudience => "audience",
                ErrorKind::MissingRequiredClaim(_) => "missing claim",
                _ => "malformed",
            };
            tracing::debug!(reason, "token rejected");
            TokenError::Invalid
        })?;

        let claims = data.claims;
        if claims.token_use() != expected {
            tracing::debug!(reason = "token use", "token rejected");
            return Err(TokenError::Invalid);
        }
        self.check_times(&claims)?;
        Ok(claims)
    }

    fn check_times<T: TimedClaims>(&self, claims: &T) -> Result<(), TokenError> {
        let now = self.clock.now().timestamp();
        if claims.nbf() > now {
            tracing::debug!(reason = "not yet valid", "token rejected");
            return Err(TokenError::Invalid);
        }
        if now >= claims.exp() {
            tracing::debug!(reason = "expired", "token rejected");
            return Err(TokenError::Expired);
        }
        Ok(())
    }
}

/// One-way hash used to persist refresh secrets. Hex-encoded SHA-256.
pub fn hash_refresh_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn truncate_to_seconds(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(at.timestamp(), 0).single().unwrap_or(at)
}
