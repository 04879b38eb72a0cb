use anyhow::{anyhow, bail};
use chrono::Duration;
use std::{env, fmt, str::FromStr};

use crate::{
    services::AuthPolicy,
    utils::{jwt::TokenSettings, password::HashParams},
};

pub const MIN_JWT_SECRET_LEN: usize = 32;
pub const MAX_ACCESS_TOKEN_TTL_MINUTES: i64 = 24 * 60;
pub const MAX_REFRESH_TOKEN_TTL_DAYS: i64 = 365;
const DEV_JWT_SECRET: &str = "dev-only-secret-change-me-before-production-use";

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub store_timeout_ms: u64,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
    pub password_hash_params: HashParams,
    /// Zero disables the in-process sweep.
    pub session_purge_interval_secs: u64,
    pub refresh_reuse_revokes_all: bool,
    pub cors_allow_origins: Vec<String>,
    pub bind_addr: String,
    pub production_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/sessionkeeper".to_string(),
            db_max_connections: 10,
            db_acquire_timeout_secs: 5,
            store_timeout_ms: 3000,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            jwt_issuer: "sessionkeeper".to_string(),
            jwt_audience: "sessionkeeper-api".to_string(),
            access_token_ttl_minutes: 15,
            refresh_token_ttl_days: 7,
            password_hash_params: HashParams::default(),
            session_purge_interval_secs: 3600,
            refresh_reuse_revokes_all: false,
            cors_allow_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
            bind_addr: "0.0.0.0:8080".to_string(),
            production_mode: false,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url)
            .field("jwt_secret", &mask_secret(&self.jwt_secret))
            .field("jwt_issuer", &self.jwt_issuer)
            .field("jwt_audience", &self.jwt_audience)
            .field("access_token_ttl_minutes", &self.access_token_ttl_minutes)
            .field("refresh_token_ttl_days", &self.refresh_token_ttl_days)
            .field("production_mode", &self.production_mode)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. `load` passes the process
    /// environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let production_mode = parse_or(&lookup, "PRODUCTION_MODE", defaults.production_mode)?;

        let jwt_secret = match lookup("JWT_SECRET").filter(|s| !s.is_empty()) {
            Some(secret) => secret,
            None if production_mode => bail!("JWT_SECRET must be set in production mode"),
            None => defaults.jwt_secret,
        };
        if production_mode && jwt_secret.len() < MIN_JWT_SECRET_LEN {
            bail!("JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} bytes in production mode");
        }

        let access_token_ttl_minutes =
            parse_or(&lookup, "ACCESS_TOKEN_TTL_MINUTES", defaults.access_token_ttl_minutes)?;
        let refresh_token_ttl_days =
            parse_or(&lookup, "REFRESH_TOKEN_TTL_DAYS", defaults.refresh_token_ttl_days)?;
        if !(1..=MAX_ACCESS_TOKEN_TTL_MINUTES).contains(&access_token_ttl_minutes) {
            bail!("ACCESS_TOKEN_TTL_MINUTES must be between 1 and {MAX_ACCESS_TOKEN_TTL_MINUTES}");
        }
        if !(1..=MAX_REFRESH_TOKEN_TTL_DAYS).contains(&refresh_token_ttl_days) {
            bail!("REFRESH_TOKEN_TTL_DAYS must be between 1 and {MAX_REFRESH_TOKEN_TTL_DAYS}");
        }

        let password_hash_params = HashParams {
            memory_kib: parse_or(
                &lookup,
                "PASSWORD_HASH_MEMORY_KIB",
                defaults.password_hash_params.memory_kib,
            )?,
            iterations: parse_or(
                &lookup,
                "PASSWORD_HASH_ITERATIONS",
                defaults.password_hash_params.iterations,
            )?,
            parallelism: parse_or(
                &lookup,
                "PASSWORD_HASH_PARALLELISM",
                defaults.password_hash_params.parallelism,
            )?,
        };

        let cors_allow_origins = match lookup("CORS_ALLOW_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect(),
            None => defaults.cors_allow_origins,
        };

        Ok(Config {
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            db_acquire_timeout_secs: parse_or(
                &lookup,
                "DB_ACQUIRE_TIMEOUT_SECS",
                defaults.db_acquire_timeout_secs,
            )?,
            store_timeout_ms: parse_or(&lookup, "STORE_TIMEOUT_MS", defaults.store_timeout_ms)?,
            jwt_secret,
            jwt_issuer: lookup("JWT_ISSUER").unwrap_or(defaults.jwt_issuer),
            jwt_audience: lookup("JWT_AUDIENCE").unwrap_or(defaults.jwt_audience),
            access_token_ttl_minutes,
            refresh_token_ttl_days,
            password_hash_params,
            session_purge_interval_secs: parse_or(
                &lookup,
                "SESSION_PURGE_INTERVAL_SECS",
                defaults.session_purge_interval_secs,
            )?,
            refresh_reuse_revokes_all: parse_or(
                &lookup,
                "REFRESH_REUSE_REVOKES_ALL",
                defaults.refresh_reuse_revokes_all,
            )?,
            cors_allow_origins,
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            production_mode,
        })
    }

    pub fn token_settings(&self) -> TokenSettings {
        TokenSettings {
            secret: self.jwt_secret.clone(),
            issuer: self.jwt_issuer.clone(),
            audience: self.jwt_audience.clone(),
            access_ttl: Duration::minutes(self.access_token_ttl_minutes),
            refresh_ttl: Duration::days(self.refresh_token_ttl_days),
        }
    }

    pub fn auth_policy(&self) -> AuthPolicy {
        AuthPolicy {
            store_timeout: std::time::Duration::from_millis(self.store_timeout_ms),
            refresh_reuse_revokes_all: self.refresh_reuse_revokes_all,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid {key} value {raw:?}: {e}")),
        None => Ok(default),
    }
}

/// First four characters and the length; never the whole secret.
pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "<empty>".into();
    }
    let prefix = s.chars().take(4).collect::<String>();
    format!("{}*** (len={})", prefix, s.len())
}
