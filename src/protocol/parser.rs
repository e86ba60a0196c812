//! Request Decoder
//!
//! Turns the bytes of one read into the token sequence of one command.
//!
//! ## Framing
//!
//! 1. **Canonical**: `*<N>\r\n` followed by `N` elements, each framed as
//!    `$<len>\r\n<len bytes>\r\n`. The element payload is taken verbatim, so
//!    tokens may contain spaces, CRLF or arbitrary binary data.
//! 2. **Inline**: anything not starting with `*` is split on ASCII whitespace.
//!    This is what you get from `telnet` or `nc`.
//!
//! ## Partial Results
//!
//! Decoding never fails. When a canonical frame is malformed or truncated
//! the decoder stops and returns the tokens it fully parsed before the bad
//! byte. Deciding whether that is enough for a command is the dispatcher's
//! job: too few tokens becomes an arity error there, zero tokens becomes
//! `ERR empty command`.

use crate::protocol::types::{prefix, CRLF};
use bytes::Bytes;
use tracing::trace;

/// Upper bound on tokens preallocated from an untrusted element count.
const MAX_PREALLOCATED_TOKENS: usize = 64;

/// Decodes one command from `buf`.
///
/// # Example
///
/// ```
/// use emberkv::protocol::decode_command;
/// use bytes::Bytes;
///
/// let tokens = decode_command(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
/// assert_eq!(tokens, vec![Bytes::from("GET"), Bytes::from("name")]);
///
/// let inline = decode_command(b"GET name\r\n");
/// assert_eq!(inline, tokens);
/// ```
pub fn decode_command(buf: &[u8]) -> Vec<Bytes> {
    match buf.first() {
        None => Vec::new(),
        Some(&prefix::ARRAY) => decode_array(buf),
        Some(_) => decode_inline(buf),
    }
}

/// Decodes `*<N>\r\n` followed by up to `N` bulk strings.
fn decode_array(buf: &[u8]) -> Vec<Bytes> {
    debug_assert!(buf[0] == prefix::ARRAY);

    let count_end = match find_crlf(&buf[1..]) {
        Some(pos) => pos,
        None => {
            trace!("array header without CRLF");
            return Vec::new();
        }
    };

    let count = match parse_length(&buf[1..1 + count_end]) {
        Some(count) => count,
        None => {
            trace!("invalid array length");
            return Vec::new();
        }
    };

    let mut tokens = Vec::with_capacity(count.min(MAX_PREALLOCATED_TOKENS));
    let mut consumed = 1 + count_end + 2;

    for _ in 0..count {
        match decode_bulk(&buf[consumed..]) {
            Some((token, used)) => {
                tokens.push(token);
                consumed += used;
            }
            None => {
                trace!(
                    expected = count,
                    parsed = tokens.len(),
                    "truncated or malformed element, returning partial command"
                );
                break;
            }
        }
    }

    tokens
}

/// Decodes a single `$<len>\r\n<data>\r\n` element.
///
/// Returns the payload and the number of bytes used, or `None` if the
/// element is malformed or incomplete.
fn decode_bulk(buf: &[u8]) -> Option<(Bytes, usize)> {
    if buf.first() != Some(&prefix::BULK_STRING) {
        return None;
    }

    let length_end = find_crlf(&buf[1..])?;
    let length = parse_length(&buf[1..1 + length_end])?;

    let data_start = 1 + length_end + 2;
    let data_end = data_start.checked_add(length)?;
    let total = data_end.checked_add(2)?;

    if buf.len() < total || &buf[data_end..total] != CRLF {
        return None;
    }

    Some((Bytes::copy_from_slice(&buf[data_start..data_end]), total))
}

/// Splits an inline command on ASCII whitespace.
fn decode_inline(buf: &[u8]) -> Vec<Bytes> {
    buf.split(|b| b.is_ascii_whitespace())
        .filter(|token| !token.is_empty())
        .map(Bytes::copy_from_slice)
        .collect()
}

/// Parses a non-negative decimal length.
fn parse_length(digits: &[u8]) -> Option<usize> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
pub(crate) fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}
