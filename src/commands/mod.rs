//! Command Processing
//!
//! Receives decoded command tokens, executes them against the store and
//! returns the reply to send back.
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ decode_command  │  (protocol module)
//! └────────┬────────┘
//!          │ Vec<Bytes>
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │  - Dispatch     │
//! │  - Validate     │
//! │  - Render       │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │     Store       │  (storage module)
//! └─────────────────┘
//! ```

pub mod handler;

pub use handler::CommandHandler;
