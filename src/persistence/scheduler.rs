//! Periodic snapshot task.

use crate::persistence::snapshot;
use crate::storage::Store;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Handle to the background task that dumps the store on a fixed interval.
///
/// A failed dump is logged and retried at the next tick. Dropping the handle
/// stops the task.
#[derive(Debug)]
pub struct SnapshotScheduler {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SnapshotScheduler {
    /// Spawns the scheduler. The first dump happens one `interval` from now.
    pub fn start(store: Arc<Store>, path: PathBuf, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(scheduler_loop(store, path, interval, shutdown_rx));

        info!(interval_secs = interval.as_secs(), "Snapshot scheduler started");

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stops the task and waits for an in-progress dump to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!("Snapshot scheduler stopped");
    }
}

impl Drop for SnapshotScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn scheduler_loop(
    store: Arc<Store>,
    path: PathBuf,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Snapshot scheduler received shutdown signal");
                    return;
                }
            }
        }

        if let Err(e) = snapshot::dump(&store, &path).await {
            warn!(error = %e, "Periodic snapshot failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_scheduler_writes_periodically() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump.snap");
        let store = Arc::new(Store::new());
        store.set(Bytes::from("k"), Bytes::from("v")).unwrap();

        let scheduler =
            SnapshotScheduler::start(Arc::clone(&store), path.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(150)).await;
        scheduler.shutdown().await;

        assert_eq!(std::fs::read(&path).unwrap(), b"Kk v\n");
    }

    #[tokio::test]
    async fn test_no_dump_before_first_interval() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump.snap");

        let scheduler =
            SnapshotScheduler::start(Arc::new(Store::new()), path.clone(), Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.shutdown().await;

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_failed_dump_keeps_running() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("dump.snap");

        let scheduler =
            SnapshotScheduler::start(Arc::new(Store::new()), path, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(scheduler.task.as_ref().is_some_and(|task| !task.is_finished()));
        scheduler.shutdown().await;
    }
}
