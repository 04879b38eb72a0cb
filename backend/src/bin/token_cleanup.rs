use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sessionkeeper_backend::{
    config::Config,
    db::connection::create_pool,
    repositories::{PgAccountRepository, PgSessionStore},
    services::{housekeeping, AuthService},
    utils::{
        clock::{Clock, SystemClock},
        jwt::TokenCodec,
        password::{HashParams, PasswordHasher},
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "token_cleanup=info,sessionkeeper_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    let pool = create_pool(&config).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    // The sweep never hashes passwords; the lightest legal params keep startup fast.
    let hasher = PasswordHasher::new(HashParams {
        memory_kib: 8,
        iterations: 1,
        parallelism: 1,
    })?;
    let auth = AuthService::new(
        Arc::new(PgAccountRepository::new(pool.clone())),
        Arc::new(PgSessionStore::new(pool.clone())),
        TokenCodec::new(config.token_settings(), clock.clone()),
        hasher,
        clock,
        config.auth_policy(),
    )?;

    let deleted = housekeeping::purge_once(&auth)
        .await
        .ok_or_else(|| anyhow::anyhow!("session purge failed"))?;
    tracing::info!(deleted, "Deleted expired or revoked session records");

    sqlx::query("VACUUM (ANALYZE) session_records")
        .execute(&pool)
        .await?;

    Ok(())
}
