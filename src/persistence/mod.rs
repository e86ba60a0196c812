//! Persistence
//!
//! Snapshots of the whole store to a flat text file, written periodically
//! and once more at shutdown, and read back at startup.
//!
//! ```text
//!   Store ──snapshot()──> Namespaces ──encode──> <path>.tmp ──rename──> <path>
//!   Store <──restore()── Namespaces <──decode── <path>
//! ```
//!
//! Expiry deadlines are not persisted: a key that had a deadline before a
//! dump comes back without one after a load.

pub mod scheduler;
pub mod snapshot;

pub use scheduler::SnapshotScheduler;
pub use snapshot::{dump, load, DumpStats, LoadStats, PersistenceError};
