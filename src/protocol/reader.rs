//! Reply Reader
//!
//! Reads exactly one reply frame from an async byte stream. This is the
//! client half of the protocol: the server never reads replies, but the
//! bundled [`Client`](crate::client::Client) and the integration tests do.
//!
//! Line-oriented frames (`+`, `-`, `:` and the length headers) are read a
//! byte at a time up to CRLF, so the reader never consumes bytes belonging
//! to the next reply. Bulk payloads are read by their declared length.
//!
//! Arrays are assembled with an explicit stack instead of recursion. Nesting
//! is capped at [`MAX_NESTING_DEPTH`] array levels, which is more than any
//! reply the command set produces.

use crate::protocol::types::{prefix, Reply};
use bytes::Bytes;
use std::io::ErrorKind;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Maximum array levels in a single reply.
pub const MAX_NESTING_DEPTH: usize = 2;

/// Maximum size for a single bulk payload (512 MB)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum length of a status, error or header line.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

const MAX_PREALLOCATED_ITEMS: usize = 1024;

/// Bulk buffers grow past this only as data actually arrives.
const MAX_PREALLOCATED_BULK: usize = 64 * 1024;

/// Errors that can occur while reading a reply.
#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended before a complete reply arrived
    #[error("connection closed in the middle of a reply")]
    UnexpectedEof,

    #[error("unknown reply type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Negative length other than -1, or a bulk larger than the limit
    #[error("invalid length: {0}")]
    InvalidLength(i64),

    #[error("reply line is not valid UTF-8")]
    InvalidUtf8,

    #[error("bulk string missing trailing CRLF")]
    MissingCrlf,

    #[error("reply line exceeds {MAX_LINE_LENGTH} bytes")]
    LineTooLong,

    #[error("array nesting deeper than {0} levels")]
    NestingTooDeep(usize),
}

/// Reads one complete reply from `reader`.
///
/// A `$-1` or `*-1` header yields [`Reply::Null`] or [`Reply::NullArray`],
/// never an empty string or array.
///
/// # Example
///
/// ```
/// # tokio_test::block_on(async {
/// use emberkv::protocol::{read_reply, Reply};
///
/// let mut input: &[u8] = b"$-1\r\n";
/// let reply = read_reply(&mut input).await.unwrap();
/// assert_eq!(reply, Reply::Null);
/// assert_eq!(reply.to_string(), "(nil)");
/// # });
/// ```
pub async fn read_reply<R>(reader: &mut R) -> Result<Reply, ReplyError>
where
    R: AsyncRead + Unpin,
{
    // Partially filled arrays: (declared length, items read so far)
    let mut open: Vec<(usize, Vec<Reply>)> = Vec::new();

    loop {
        let sigil = read_byte(reader).await?;
        let mut value = match sigil {
            prefix::SIMPLE_STRING => Reply::SimpleString(read_text_line(reader).await?),
            prefix::ERROR => Reply::Error(read_text_line(reader).await?),
            prefix::INTEGER => Reply::Integer(read_integer_line(reader).await?),
            prefix::BULK_STRING => read_bulk_body(reader).await?,
            prefix::ARRAY => {
                let count = read_integer_line(reader).await?;
                match count {
                    -1 => Reply::NullArray,
                    0 => Reply::Array(Vec::new()),
                    n if n < -1 => return Err(ReplyError::InvalidLength(n)),
                    n => {
                        if open.len() >= MAX_NESTING_DEPTH {
                            return Err(ReplyError::NestingTooDeep(MAX_NESTING_DEPTH));
                        }
                        let n = usize::try_from(n).map_err(|_| ReplyError::InvalidLength(n))?;
                        open.push((n, Vec::with_capacity(n.min(MAX_PREALLOCATED_ITEMS))));
                        continue;
                    }
                }
            }
            other => return Err(ReplyError::UnknownPrefix(other)),
        };

        // Fold the finished value into its parent arrays.
        loop {
            let Some((expected, mut items)) = open.pop() else {
                return Ok(value);
            };
            items.push(value);
            if items.len() < expected {
                open.push((expected, items));
                break;
            }
            value = Reply::Array(items);
        }
    }
}

/// Reads `<len>\r\n<data>\r\n` after the `$` sigil.
async fn read_bulk_body<R>(reader: &mut R) -> Result<Reply, ReplyError>
where
    R: AsyncRead + Unpin,
{
    let length = read_integer_line(reader).await?;
    if length == -1 {
        return Ok(Reply::Null);
    }
    let size = usize::try_from(length)
        .ok()
        .filter(|size| *size <= MAX_BULK_SIZE)
        .ok_or(ReplyError::InvalidLength(length))?;

    let mut data = Vec::with_capacity(size.min(MAX_PREALLOCATED_BULK));
    (&mut *reader)
        .take(size as u64)
        .read_to_end(&mut data)
        .await
        .map_err(eof_aware)?;
    if data.len() < size {
        return Err(ReplyError::UnexpectedEof);
    }

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf).await.map_err(eof_aware)?;
    if &crlf != b"\r\n" {
        return Err(ReplyError::MissingCrlf);
    }

    Ok(Reply::BulkString(Bytes::from(data)))
}

async fn read_integer_line<R>(reader: &mut R) -> Result<i64, ReplyError>
where
    R: AsyncRead + Unpin,
{
    let line = read_text_line(reader).await?;
    line.parse().map_err(|_| ReplyError::InvalidInteger(line))
}

async fn read_text_line<R>(reader: &mut R) -> Result<String, ReplyError>
where
    R: AsyncRead + Unpin,
{
    let line = read_line(reader).await?;
    String::from_utf8(line).map_err(|_| ReplyError::InvalidUtf8)
}

/// Reads bytes up to and excluding the next CRLF.
async fn read_line<R>(reader: &mut R) -> Result<Vec<u8>, ReplyError>
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        let byte = read_byte(reader).await?;
        if byte == b'\n' && line.last() == Some(&b'\r') {
            line.pop();
            return Ok(line);
        }
        if line.len() >= MAX_LINE_LENGTH {
            return Err(ReplyError::LineTooLong);
        }
        line.push(byte);
    }
}

async fn read_byte<R>(reader: &mut R) -> Result<u8, ReplyError>
where
    R: AsyncRead + Unpin,
{
    reader.read_u8().await.map_err(eof_aware)
}

fn eof_aware(err: std::io::Error) -> ReplyError {
    if err.kind() == ErrorKind::UnexpectedEof {
        ReplyError::UnexpectedEof
    } else {
        ReplyError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    async fn read_all(input: &[u8]) -> Result<Reply, ReplyError> {
        let mut input = input;
        read_reply(&mut input).await
    }

    #[tokio::test]
    async fn test_read_line_types() {
        assert_eq!(read_all(b"+PONG\r\n").await.unwrap(), Reply::pong());
        assert_eq!(
            read_all(b"-ERR no such key\r\n").await.unwrap(),
            Reply::error("ERR no such key")
        );
        assert_eq!(read_all(b":-7\r\n").await.unwrap(), Reply::integer(-7));
    }

    #[tokio::test]
    async fn test_read_bulk_and_nulls() {
        assert_eq!(
            read_all(b"$5\r\nhe\r\no\r\n").await.unwrap(),
            Reply::bulk_string(Bytes::from(&b"he\r\no"[..]))
        );
        assert_eq!(
            read_all(b"$0\r\n\r\n").await.unwrap(),
            Reply::bulk_string(Bytes::new())
        );
        assert_eq!(read_all(b"$-1\r\n").await.unwrap(), Reply::Null);
        assert_eq!(read_all(b"*-1\r\n").await.unwrap(), Reply::NullArray);
    }

    #[tokio::test]
    async fn test_read_array() {
        let reply = read_all(b"*3\r\n$1\r\na\r\n:2\r\n$-1\r\n").await.unwrap();
        assert_eq!(
            reply,
            Reply::array(vec![
                Reply::bulk_string(Bytes::from("a")),
                Reply::integer(2),
                Reply::Null,
            ])
        );
        assert_eq!(read_all(b"*0\r\n").await.unwrap(), Reply::array(vec![]));
    }

    #[tokio::test]
    async fn test_one_level_of_nesting_is_allowed() {
        let reply = read_all(b"*2\r\n*1\r\n:1\r\n:2\r\n").await.unwrap();
        assert_eq!(
            reply,
            Reply::array(vec![Reply::array(vec![Reply::integer(1)]), Reply::integer(2)])
        );
    }

    #[tokio::test]
    async fn test_deeper_nesting_rejected() {
        let result = read_all(b"*1\r\n*1\r\n*1\r\n:1\r\n").await;
        assert!(matches!(result, Err(ReplyError::NestingTooDeep(2))));
    }

    #[tokio::test]
    async fn test_reads_exactly_one_reply() {
        let mut input: &[u8] = b"+OK\r\n:1\r\n";
        assert_eq!(read_reply(&mut input).await.unwrap(), Reply::ok());
        assert_eq!(read_reply(&mut input).await.unwrap(), Reply::integer(1));
    }

    #[tokio::test]
    async fn test_reply_split_across_reads() {
        let mut mock = Builder::new()
            .read(b"*2\r\n$3\r\nfo")
            .read(b"o\r\n$3")
            .read(b"\r\nbar\r\n")
            .build();
        let reply = read_reply(&mut mock).await.unwrap();
        assert_eq!(
            reply,
            Reply::bulk_array(vec![Bytes::from("foo"), Bytes::from("bar")])
        );
    }

    #[tokio::test]
    async fn test_truncated_reply() {
        assert!(matches!(
            read_all(b"$5\r\nhel").await,
            Err(ReplyError::UnexpectedEof)
        ));
        assert!(matches!(
            read_all(b"*2\r\n:1\r\n").await,
            Err(ReplyError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_large_declared_bulk_with_short_body() {
        assert!(matches!(
            read_all(b"$100000000\r\nabc").await,
            Err(ReplyError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_bulk_larger_than_preallocation() {
        let body = vec![b'x'; MAX_PREALLOCATED_BULK * 2 + 3];
        let mut input = format!("${}\r\n", body.len()).into_bytes();
        input.extend_from_slice(&body);
        input.extend_from_slice(b"\r\n");

        let mut mock = Builder::new()
            .read(&input[..MAX_PREALLOCATED_BULK])
            .read(&input[MAX_PREALLOCATED_BULK..])
            .build();
        assert_eq!(
            read_reply(&mut mock).await.unwrap(),
            Reply::bulk_string(Bytes::from(body))
        );
    }

    #[tokio::test]
    async fn test_malformed_replies() {
        assert!(matches!(
            read_all(b"?what\r\n").await,
            Err(ReplyError::UnknownPrefix(b'?'))
        ));
        assert!(matches!(
            read_all(b":abc\r\n").await,
            Err(ReplyError::InvalidInteger(_))
        ));
        assert!(matches!(
            read_all(b"$-2\r\n").await,
            Err(ReplyError::InvalidLength(-2))
        ));
        assert!(matches!(
            read_all(b"$2\r\nabXY").await,
            Err(ReplyError::MissingCrlf)
        ));
    }
}
