//! # EmberKV - An In-Memory String, List and Hash Store
//!
//! EmberKV keeps three kinds of values (strings, lists and hashes) in memory,
//! serves them over TCP with a Redis-style wire protocol, and snapshots them
//! to a flat text file.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              EmberKV                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │   Server    │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                                               │                         │
//! │                                               ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐   │
//! │  │  Protocol   │    │                   Store                      │   │
//! │  │  decode /   │    │   Mutex<strings | lists | hashes | expiries> │   │
//! │  │  encode     │    └──────────────────────────────────────────────┘   │
//! │  └─────────────┘               ▲                       ▲               │
//! │                                │                       │               │
//! │                   ┌────────────┴──────┐   ┌────────────┴────────────┐  │
//! │                   │  ExpirySweeper    │   │   SnapshotScheduler     │  │
//! │                   └───────────────────┘   └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use emberkv::{Config, Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = Server::bind(Config::default()).await?;
//!     server.run(async { let _ = tokio::signal::ctrl_c().await; }).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: request decoding, reply encoding, client-side reply reader
//! - [`storage`]: the shared store and the expiry sweeper
//! - [`commands`]: command dispatch
//! - [`persistence`]: snapshot files and the periodic snapshot task
//! - [`connection`]: per-client read/execute/reply loop
//! - [`server`]: listener and shutdown sequence
//! - [`client`]: a small async client

pub mod client;
pub mod commands;
pub mod config;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod server;
pub mod storage;

pub use config::Config;
pub use server::{Server, ServerError};

/// Version of EmberKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
