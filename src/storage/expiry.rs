//! Background Expiry Sweeper
//!
//! Lazy eviction only removes a key when something touches it. A key that
//! expires and is never read again would otherwise sit in memory (and end up
//! in the next snapshot) forever, so this task periodically calls
//! [`Store::purge_expired`] as well.
//!
//! ## Adaptive Frequency
//!
//! The sweep interval halves while a large share of the keys with deadlines
//! turn out to be due, and doubles while sweeps find nothing, staying within
//! `[min_interval, max_interval]`.

use crate::storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Interval between sweeps at startup (default: 100ms)
    pub base_interval: Duration,

    pub min_interval: Duration,

    pub max_interval: Duration,

    /// Speed up when more than this fraction of expiring keys was due
    pub speedup_threshold: f64,
}

impl ExpiryConfig {
    /// Default bounds around a custom starting interval.
    pub fn with_interval(base_interval: Duration) -> Self {
        Self {
            base_interval,
            min_interval: base_interval.min(Duration::from_millis(10)),
            max_interval: base_interval.max(Duration::from_secs(1)),
            ..Default::default()
        }
    }
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            speedup_threshold: 0.25,
        }
    }
}

/// Handle to the running sweeper task.
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    /// Spawns the sweeper on the current tokio runtime.
    pub fn start(store: Arc<Store>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(sweeper_loop(store, config, shutdown_rx));

        info!("Background expiry sweeper started");

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Signals the task to stop without waiting for it.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stops the task and waits for it to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!("Background expiry sweeper stopped");
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    store: Arc<Store>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut current_interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(current_interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let expiring = store.stats().expiring;
        let expired = store.purge_expired();

        if expired > 0 {
            let rate = expired as f64 / expiring.max(1) as f64;
            if rate > config.speedup_threshold {
                current_interval = (current_interval / 2).max(config.min_interval);
            }
            debug!(
                expired,
                remaining = store.stats().keys(),
                interval_ms = current_interval.as_millis(),
                "Expired keys cleaned up"
            );
        } else {
            current_interval = (current_interval * 2).min(config.max_interval);
            trace!(
                interval_ms = current_interval.as_millis(),
                "Nothing expired, slowing down sweeper"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn fast_config() -> ExpiryConfig {
        ExpiryConfig {
            base_interval: Duration::from_millis(10),
            min_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sweeper_cleans_expired_keys() {
        let store = Arc::new(Store::new());

        for i in 0..10 {
            let key = Bytes::from(format!("key{}", i));
            store.set(key.clone(), Bytes::from("value")).unwrap();
            store.expire(&key, 0).unwrap();
        }
        store
            .set(Bytes::from("persistent"), Bytes::from("value"))
            .unwrap();

        let _sweeper = ExpirySweeper::start(Arc::clone(&store), fast_config());
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Removed without anything touching the keys
        let stats = store.stats();
        assert_eq!(stats.keys(), 1);
        assert_eq!(stats.expiring, 0);
        assert_eq!(stats.expired_total, 10);
    }

    #[tokio::test]
    async fn test_sweeper_leaves_future_deadlines() {
        let store = Arc::new(Store::new());
        store.set(Bytes::from("key"), Bytes::from("value")).unwrap();
        store.expire(b"key", 100).unwrap();

        let _sweeper = ExpirySweeper::start(Arc::clone(&store), fast_config());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.stats().expiring, 1);
        assert!(store.exists(b"key"));
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let store = Arc::new(Store::new());

        let sweeper = ExpirySweeper::start(Arc::clone(&store), fast_config());
        sweeper.shutdown().await;

        store.set(Bytes::from("key"), Bytes::from("value")).unwrap();
        store.expire(b"key", 0).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Still in the table: only lazy eviction would remove it now
        assert_eq!(store.stats().expiring, 1);
        assert_eq!(store.get(b"key").unwrap(), None);
    }

    #[test]
    fn test_with_interval_bounds() {
        let config = ExpiryConfig::with_interval(Duration::from_secs(5));
        assert_eq!(config.min_interval, Duration::from_millis(10));
        assert_eq!(config.max_interval, Duration::from_secs(5));

        let config = ExpiryConfig::with_interval(Duration::from_millis(1));
        assert_eq!(config.min_interval, Duration::from_millis(1));
    }
}
