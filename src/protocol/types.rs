//! Reply Frames
//!
//! This module defines the reply tree sent back to clients and the encoder
//! that turns it into wire bytes.
//!
//! ## Wire Format
//!
//! Each reply starts with a single sigil byte and is terminated by CRLF:
//! - `+` Simple String: `+OK\r\n`
//! - `-` Error: `-ERR unknown command 'FOO'\r\n`
//! - `:` Integer: `:3\r\n`
//! - `$` Bulk String: `$5\r\nhello\r\n`, or `$-1\r\n` for nil
//! - `*` Array: `*2\r\n$1\r\na\r\n$1\r\nb\r\n`, or `*-1\r\n` for a nil array
//!
//! Requests travel the other way as an array of bulk strings, which is what
//! [`encode_command`] produces.

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used by every frame
pub const CRLF: &[u8] = b"\r\n";

/// Frame type sigils
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A single reply frame.
///
/// Arrays may nest, but the command set only ever produces flat arrays of
/// bulk strings, so encoding depth is bounded by the replies the dispatcher
/// builds rather than by anything a client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Short status line, must not contain CR or LF.
    SimpleString(String),

    /// Error line, rendered with a `-` sigil.
    Error(String),

    /// Signed 64-bit integer.
    Integer(i64),

    /// Length-prefixed, binary-safe string.
    BulkString(Bytes),

    /// Nil bulk string (`$-1`).
    Null,

    /// Array of nested replies.
    Array(Vec<Reply>),

    /// Nil array (`*-1`).
    NullArray,
}

impl Reply {
    /// Creates a simple string reply.
    ///
    /// # Example
    /// ```
    /// use emberkv::protocol::Reply;
    /// assert_eq!(Reply::simple_string("OK").encode(), b"+OK\r\n");
    /// ```
    pub fn simple_string(s: impl Into<String>) -> Self {
        Reply::SimpleString(s.into())
    }

    /// Creates an error reply.
    pub fn error(s: impl Into<String>) -> Self {
        Reply::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        Reply::Integer(n)
    }

    /// Creates a bulk string reply.
    ///
    /// # Example
    /// ```
    /// use emberkv::protocol::Reply;
    /// use bytes::Bytes;
    /// let bulk = Reply::bulk_string(Bytes::from("hello"));
    /// assert_eq!(bulk.encode(), b"$5\r\nhello\r\n");
    /// ```
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        Reply::BulkString(data.into())
    }

    /// A bulk string when a value is present, nil otherwise.
    pub fn optional_bulk(data: Option<Bytes>) -> Self {
        match data {
            Some(data) => Reply::BulkString(data),
            None => Reply::Null,
        }
    }

    pub fn null() -> Self {
        Reply::Null
    }

    pub fn array(values: Vec<Reply>) -> Self {
        Reply::Array(values)
    }

    /// An array of bulk strings.
    pub fn bulk_array<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        Reply::Array(items.into_iter().map(Reply::BulkString).collect())
    }

    /// Common response for successful operations
    pub fn ok() -> Self {
        Reply::SimpleString("OK".to_string())
    }

    pub fn pong() -> Self {
        Reply::SimpleString("PONG".to_string())
    }

    /// Encodes the reply into its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Encodes the reply into an existing buffer.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::SimpleString(s) => write_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            Reply::Error(s) => write_line(buf, prefix::ERROR, s.as_bytes()),
            Reply::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            Reply::BulkString(data) => write_bulk(buf, data),
            Reply::Null => write_line(buf, prefix::BULK_STRING, b"-1"),
            Reply::Array(values) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.encode_into(buf);
                }
            }
            Reply::NullArray => write_line(buf, prefix::ARRAY, b"-1"),
        }
    }

    /// Returns true for both nil variants.
    pub fn is_null(&self) -> bool {
        matches!(self, Reply::Null | Reply::NullArray)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Returns the text of a simple string or a UTF-8 bulk string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::SimpleString(s) => Some(s),
            Reply::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(arr) => Some(arr),
            _ => None,
        }
    }
}

/// Encodes a request as an array of bulk strings.
///
/// # Example
/// ```
/// use emberkv::protocol::encode_command;
/// assert_eq!(
///     encode_command(&["GET", "name"]),
///     b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n"
/// );
/// ```
pub fn encode_command<A: AsRef<[u8]>>(args: &[A]) -> Vec<u8> {
    let mut buf = Vec::new();
    write_line(&mut buf, prefix::ARRAY, args.len().to_string().as_bytes());
    for arg in args {
        write_bulk(&mut buf, arg.as_ref());
    }
    buf
}

fn write_line(buf: &mut Vec<u8>, sigil: u8, body: &[u8]) {
    buf.push(sigil);
    buf.extend_from_slice(body);
    buf.extend_from_slice(CRLF);
}

fn write_bulk(buf: &mut Vec<u8>, data: &[u8]) {
    write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(CRLF);
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::SimpleString(s) => write!(f, "{}", s),
            Reply::Error(s) => write!(f, "(error) {}", s),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::BulkString(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            Reply::Null | Reply::NullArray => write!(f, "(nil)"),
            Reply::Array(values) => {
                if values.is_empty() {
                    return write!(f, "(empty array)");
                }
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, v)?;
                }
                Ok(())
            }
        }
    }
}
