//! Client Connections
//!
//! Each accepted client is served by its own tokio task. Tasks share nothing
//! but the [`CommandHandler`](crate::commands::CommandHandler) (and through
//! it the store) and a set of counters.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                    (server.rs)                              │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ accept()
//!                        ▼
//!           ┌────────────────────────┐
//!           │  spawn one task each   │
//!           └────────────┬───────────┘
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │   read chunk ──> decode ──> execute ──> write reply         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
