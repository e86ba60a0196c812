//! Connection Handler Module
//!
//! Each accepted client gets its own task running [`ConnectionHandler::run`].
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. ConnectionHandler spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │  Read one chunk (≤ 64 KiB)   │
//!    │              │               │
//!    │              ▼               │
//!    │  decode_command(chunk)       │
//!    │              │               │
//!    │              ▼               │
//!    │  CommandHandler::execute     │
//!    │              │               │
//!    │              ▼               │
//!    │  Write the encoded reply     │
//!    │              │               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Peer closes / read or write error → task ends
//! ```
//!
//! ## One Command per Read
//!
//! There is no buffering across reads: whatever one read returns is decoded
//! as exactly one command and answered with exactly one reply. A command
//! split across two reads is answered as two (malformed) commands, and bytes
//! following the first command in a chunk are dropped.

use crate::commands::CommandHandler;
use crate::protocol::decode_command;
use crate::protocol::Reply;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

/// Largest number of bytes taken from the socket per read.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn active(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Socket read or write failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Client closed the connection
    #[error("Client disconnected")]
    ClientDisconnected,
}

/// Serves one client over any byte stream.
pub struct ConnectionHandler<S> {
    stream: S,

    /// Peer address, for logging
    addr: SocketAddr,

    chunk: Vec<u8>,

    command_handler: CommandHandler,

    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream,
            addr,
            chunk: vec![0u8; CHUNK_SIZE],
            command_handler,
            stats,
        }
    }

    /// Runs the read/execute/reply loop until the client goes away.
    ///
    /// A clean close by the peer is reported as `Ok(())`.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(client = %self.addr, "Client connected");

        let result = match self.main_loop().await {
            Err(ConnectionError::ClientDisconnected) => Ok(()),
            other => other,
        };

        match &result {
            Ok(()) => debug!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let n = self.stream.read(&mut self.chunk).await?;
            if n == 0 {
                return Err(ConnectionError::ClientDisconnected);
            }
            self.stats.bytes_read(n);
            trace!(client = %self.addr, bytes = n, "Read data");

            let tokens = decode_command(&self.chunk[..n]);
            let reply = self.command_handler.execute(tokens);
            self.stats.command_processed();

            self.send_reply(&reply).await?;
        }
    }

    async fn send_reply(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        let bytes = reply.encode();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(client = %self.addr, bytes = bytes.len(), "Sent reply");
        Ok(())
    }
}

// Runs on clean exit as well as when the task is aborted mid-read.
impl<S> Drop for ConnectionHandler<S> {
    fn drop(&mut self) {
        self.stats.connection_closed();
    }
}

/// Serves a TCP client to completion.
///
/// Errors are logged by the handler and go no further, so one failing
/// client never affects the listener or other clients.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats);
    let _ = handler.run().await;
}
