//! Background cache maintenance.

use crate::cache::DataKeyCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Spawns a task that purges expired data keys every `interval`.
///
/// Lazy expiry already keeps stale keys from being served; the sweeper only
/// releases their memory sooner. The task exits when `shutdown` is
/// cancelled.
///
/// # Panics
///
/// Panics if `interval` is zero, or if called outside a tokio runtime.
#[must_use = "dropping the handle detaches the sweeper"]
pub fn spawn_cache_sweeper(
    cache: Arc<DataKeyCache>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tokio::spawn(async move {
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("cache sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = cache.purge_expired();
                    if removed > 0 {
                        debug!(removed, remaining = cache.len(), "purged expired data keys");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProviderRegistry;
    use secrecy::SecretVec;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_and_stops() {
        let registry = ProviderRegistry::new().with_local("local", SecretVec::new(vec![3; 32]));
        let cache = Arc::new(DataKeyCache::new(Arc::new(registry), Duration::from_secs(60)));
        cache.get_or_create("local", "org:1").await.unwrap();
        let cached = cache.len();
        assert!(cached > 0);

        let shutdown = CancellationToken::new();
        let handle =
            spawn_cache_sweeper(Arc::clone(&cache), Duration::from_secs(10), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(cache.len(), cached);

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert!(cache.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
