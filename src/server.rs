//! TCP Server
//!
//! Owns the listener and the lifecycle around it:
//!
//! ```text
//! bind()  : load snapshot ──> bind listener
//! run()   : start sweeper + snapshot scheduler
//!           accept loop (one task per client)  ◄── until shutdown resolves
//!           drain clients (grace period, then abort)
//!           stop background tasks ──> final snapshot ──> drop listener
//! ```

use crate::commands::CommandHandler;
use crate::config::Config;
use crate::connection::{handle_connection, ConnectionStats};
use crate::persistence::{self, SnapshotScheduler};
use crate::storage::{ExpiryConfig, ExpirySweeper, Store};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Errors that stop the server from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// A bound server, ready to [`run`](Server::run).
pub struct Server {
    config: Config,
    store: Arc<Store>,
    stats: Arc<ConnectionStats>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Loads the snapshot into a fresh store and binds the listener.
    ///
    /// A missing snapshot file starts an empty store; an unreadable one is
    /// logged and also starts empty.
    pub async fn bind(config: Config) -> Result<Self, ServerError> {
        let store = Arc::new(Store::new());
        match persistence::load(&store, &config.snapshot_path).await {
            Ok(Some(_)) => {}
            Ok(None) => info!(
                path = %config.snapshot_path.display(),
                "No snapshot found, starting with an empty store"
            ),
            Err(e) => warn!(error = %e, "Could not load snapshot, starting with an empty store"),
        }

        Self::bind_with_store(config, store).await
    }

    /// Binds the listener around an already loaded store.
    async fn bind_with_store(config: Config, store: Arc<Store>) -> Result<Self, ServerError> {
        let addr = config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        info!(address = %local_addr, "Listening");

        Ok(Self {
            config,
            store,
            stats: Arc::new(ConnectionStats::new()),
            listener,
            local_addr,
        })
    }

    /// The address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connection counters, shared with every client task.
    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// Serves clients until `shutdown` resolves, then shuts down in order.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let Server {
            config,
            store,
            stats,
            listener,
            ..
        } = self;

        let sweeper = ExpirySweeper::start(
            Arc::clone(&store),
            ExpiryConfig::with_interval(config.sweep_interval()),
        );
        let scheduler = config.snapshot_every().map(|interval| {
            SnapshotScheduler::start(Arc::clone(&store), config.snapshot_path.clone(), interval)
        });

        let handler = CommandHandler::new(Arc::clone(&store));
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        connections.spawn(handle_connection(
                            stream,
                            addr,
                            handler.clone(),
                            Arc::clone(&stats),
                        ));
                    }
                    Err(e) => error!(error = %e, "Failed to accept connection"),
                },
                // Reap finished connection tasks
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drain(&mut connections, &config).await;

        sweeper.shutdown().await;
        if let Some(scheduler) = scheduler {
            scheduler.shutdown().await;
        }

        if let Err(e) = persistence::dump(&store, &config.snapshot_path).await {
            warn!(error = %e, "Final snapshot failed");
        }

        drop(listener);
        let summary = store.stats();
        info!(
            keys = summary.keys(),
            expired = summary.expired_total,
            connections = stats.connections_accepted.load(Ordering::Relaxed),
            commands = stats.commands_processed.load(Ordering::Relaxed),
            still_open = stats.active(),
            "Server shutdown complete"
        );
    }
}

/// Waits for open connections, aborting whatever is left after the grace period.
///
/// Joining is bounded on purpose: an idle client would otherwise keep the
/// process alive forever, since connections have no timeout of their own.
/// Aborted handlers still release their slot in [`ConnectionStats`].
async fn drain(connections: &mut JoinSet<()>, config: &Config) {
    if connections.is_empty() {
        return;
    }
    info!(open = connections.len(), "Waiting for open connections");

    let finished = tokio::time::timeout(config.shutdown_grace(), async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if finished.is_err() {
        warn!(
            open = connections.len(),
            "Grace period elapsed, closing remaining connections"
        );
        connections.abort_all();
        while connections.join_next().await.is_some() {}
    }
}
