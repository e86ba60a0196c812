//! Storage Module
//!
//! The shared data store and the background task that evicts expired keys.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │   Mutex<Keyspace>: strings │ lists │ hashes │ expiries      │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ purge_expired()
//!              ┌─────────────┴─────────────┐
//!              │     ExpirySweeper         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use emberkv::storage::{KeyType, Store};
//! use bytes::Bytes;
//!
//! let store = Store::new();
//! store.hset(Bytes::from("user"), Bytes::from("name"), Bytes::from("Ariz")).unwrap();
//! assert_eq!(store.key_type(b"user"), Some(KeyType::Hash));
//!
//! store.expire(b"user", 0).unwrap();
//! assert_eq!(store.key_type(b"user"), None);
//! ```

pub mod engine;
pub mod expiry;
pub mod glob;

pub use engine::{KeyType, Namespaces, Store, StoreError, StoreResult, StoreStats};
pub use expiry::{ExpiryConfig, ExpirySweeper};
pub use glob::glob_match;
