//! Periodic removal of expired and revoked session records.

use std::time::Duration;
use tokio::task::JoinHandle;

use super::AuthService;

/// Runs one sweep and logs the outcome. Returns the number of rows removed.
pub async fn purge_once(auth: &AuthService) -> Option<u64> {
    match auth.purge_sessions().await {
        Ok(deleted) => {
            if deleted > 0 {
                tracing::info!(deleted, "purged expired or revoked sessions");
            }
            Some(deleted)
        }
        Err(err) => {
            tracing::warn!(error = %err, "session purge failed");
            None
        }
    }
}

/// Sweeps every `interval` until the runtime shuts down. The first sweep runs
/// after one full interval.
pub fn spawn_session_purge(auth: AuthService, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            purge_once(&auth).await;
        }
    })
}
