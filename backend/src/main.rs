use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sessionkeeper_backend::{
    config::{mask_secret, Config},
    db::connection::create_pool,
    repositories::{PgAccountRepository, PgSessionStore},
    routes,
    services::{housekeeping, AuthService},
    state::AppState,
    utils::{
        clock::{Clock, SystemClock},
        jwt::TokenCodec,
        password::PasswordHasher,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sessionkeeper_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    tracing::info!(
        database_url = %config.database_url,
        jwt_secret = %mask_secret(&config.jwt_secret),
        jwt_issuer = %config.jwt_issuer,
        access_token_ttl_minutes = config.access_token_ttl_minutes,
        refresh_token_ttl_days = config.refresh_token_ttl_days,
        production_mode = config.production_mode,
        "Loaded configuration from environment/.env"
    );

    let pool = create_pool(&config).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let auth = AuthService::new(
        Arc::new(PgAccountRepository::new(pool.clone())),
        Arc::new(PgSessionStore::new(pool)),
        TokenCodec::new(config.token_settings(), clock.clone()),
        PasswordHasher::new(config.password_hash_params)?,
        clock,
        config.auth_policy(),
    )?;

    if config.session_purge_interval_secs > 0 {
        housekeeping::spawn_session_purge(
            auth.clone(),
            Duration::from_secs(config.session_purge_interval_secs),
        );
    }

    let addr: SocketAddr = config.bind_addr.parse()?;
    let app = routes::router(AppState::new(config, auth));

    tracing::info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
