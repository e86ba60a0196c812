//! Wire Protocol
//!
//! The request/response format spoken over TCP.
//!
//! ## Modules
//!
//! - `types`: the [`Reply`] tree and its encoder, plus request encoding
//! - `parser`: decodes one request into command tokens
//! - `reader`: reads one reply from a stream (client side)
//!
//! ## Example
//!
//! ```
//! use emberkv::protocol::{decode_command, Reply};
//! use bytes::Bytes;
//!
//! // Decoding an incoming request
//! let tokens = decode_command(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
//! assert_eq!(tokens.len(), 2);
//!
//! // Encoding a reply
//! let reply = Reply::bulk_string(Bytes::from("Ariz"));
//! assert_eq!(reply.encode(), b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod reader;
pub mod types;

pub use parser::decode_command;
pub use reader::{read_reply, ReplyError};
pub use types::{encode_command, Reply};
