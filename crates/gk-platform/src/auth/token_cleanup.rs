//! Refresh Token Cleanup
//!
//! Periodically purges expired registry entries until shutdown is signalled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::auth::refresh_token_store::RefreshTokenStore;

/// Run one purge. Errors are logged, not returned.
pub async fn purge_expired(store: &dyn RefreshTokenStore) -> u64 {
    match store.delete_expired().await {
        Ok(removed) => {
            metrics::counter!("gatekeeper.registry.purged_total").increment(removed);
            if removed > 0 {
                info!(removed, backend = store.backend_name(), "Purged expired refresh tokens");
            } else {
                debug!("No expired refresh tokens to purge");
            }
            removed
        }
        Err(e) => {
            error!(error = %e, "Failed to purge expired refresh tokens");
            0
        }
    }
}

/// Spawn the purge loop. The first purge runs one full interval after start.
pub fn spawn_cleanup_task(
    store: Arc<dyn RefreshTokenStore>,
    interval: Duration,
    shutdown_tx: &broadcast::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = interval.as_secs(), "Refresh token cleanup task started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    purge_expired(store.as_ref()).await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Refresh token cleanup task shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::memory_token_store::InMemoryRefreshTokenStore;
    use crate::auth::refresh_token::RefreshToken;

    #[tokio::test]
    async fn test_purge_expired() {
        let store = InMemoryRefreshTokenStore::new();
        let (_, expired) = RefreshToken::generate("P1", None, chrono::Duration::seconds(-1));
        store.insert(&expired).await.unwrap();

        assert_eq!(purge_expired(&store).await, 1);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_runs_and_stops() {
        let store = Arc::new(InMemoryRefreshTokenStore::new());
        let (_, expired) = RefreshToken::generate("P1", None, chrono::Duration::seconds(-1));
        store.insert(&expired).await.unwrap();

        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = spawn_cleanup_task(store.clone(), Duration::from_secs(60), &shutdown_tx);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(store.is_empty());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
