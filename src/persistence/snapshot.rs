//! Snapshot File Format
//!
//! A snapshot is a flat text file with one record per key:
//!
//! ```text
//! K<key> <value>
//! L<key> <elem> <elem> ...
//! H<key> <field>:<value> <field>:<value> ...
//! ```
//!
//! The tag character is followed directly by the key, and the remaining
//! tokens are separated by single spaces.
//!
//! ## Escaping
//!
//! Tokens are percent-escaped so that any byte string survives a round trip:
//! `%` becomes `%25`, ASCII whitespace becomes `%20`, `%09`, `%0A`, `%0B`,
//! `%0C` or `%0D`, and `:` becomes `%3A`. An empty token is written as a
//! lone `%`. Escapes that are not two hex digits are read back literally.
//!
//! Expiry deadlines are not part of the format; keys loaded from a snapshot
//! never expire.

use crate::storage::{Namespaces, Store};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

const TAG_STRING: u8 = b'K';
const TAG_LIST: u8 = b'L';
const TAG_HASH: u8 = b'H';

/// Errors from reading or writing a snapshot file.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("snapshot I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PersistenceError {
    fn io(path: &Path, source: io::Error) -> Self {
        PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Summary of a completed dump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpStats {
    pub keys: usize,
    pub bytes: usize,
}

/// Summary of a completed load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub strings: usize,
    pub lists: usize,
    pub hashes: usize,
    /// Malformed lines that were ignored
    pub skipped: usize,
}

impl LoadStats {
    pub fn keys(&self) -> usize {
        self.strings + self.lists + self.hashes
    }
}

/// Writes every live key in `store` to `path`.
///
/// The store lock is held only while copying the keyspace. The file is
/// written to `<path>.tmp`, synced, and renamed over `path`.
pub async fn dump(store: &Store, path: &Path) -> Result<DumpStats, PersistenceError> {
    let data = store.snapshot();
    let contents = encode(&data);

    let tmp_path = tmp_path(path);
    let mut file = fs::File::create(&tmp_path)
        .await
        .map_err(|e| PersistenceError::io(&tmp_path, e))?;
    file.write_all(&contents)
        .await
        .map_err(|e| PersistenceError::io(&tmp_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| PersistenceError::io(&tmp_path, e))?;
    drop(file);

    fs::rename(&tmp_path, path)
        .await
        .map_err(|e| PersistenceError::io(path, e))?;

    let stats = DumpStats {
        keys: data.len(),
        bytes: contents.len(),
    };
    info!(
        path = %path.display(),
        keys = stats.keys,
        bytes = stats.bytes,
        "Snapshot written"
    );
    Ok(stats)
}

/// Replaces the contents of `store` with the snapshot at `path`.
///
/// Returns `Ok(None)` without touching the store if the file does not exist.
pub async fn load(store: &Store, path: &Path) -> Result<Option<LoadStats>, PersistenceError> {
    let contents = match fs::read(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PersistenceError::io(path, e)),
    };

    let (data, stats) = decode(&contents);
    store.restore(data);

    info!(
        path = %path.display(),
        keys = stats.keys(),
        skipped = stats.skipped,
        "Snapshot loaded"
    );
    Ok(Some(stats))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

// ============================================================================
// Encoding
// ============================================================================

/// Serializes the namespaces, keys in sorted order.
pub fn encode(data: &Namespaces) -> Vec<u8> {
    let mut out = Vec::new();

    let mut strings: Vec<_> = data.strings.iter().collect();
    strings.sort();
    for (key, value) in strings {
        out.push(TAG_STRING);
        escape_into(&mut out, key);
        out.push(b' ');
        escape_into(&mut out, value);
        out.push(b'\n');
    }

    let mut lists: Vec<_> = data.lists.iter().collect();
    lists.sort_by(|a, b| a.0.cmp(b.0));
    for (key, items) in lists {
        out.push(TAG_LIST);
        escape_into(&mut out, key);
        for item in items {
            out.push(b' ');
            escape_into(&mut out, item);
        }
        out.push(b'\n');
    }

    let mut hashes: Vec<_> = data.hashes.iter().collect();
    hashes.sort_by(|a, b| a.0.cmp(b.0));
    for (key, fields) in hashes {
        out.push(TAG_HASH);
        escape_into(&mut out, key);
        let mut fields: Vec<_> = fields.iter().collect();
        fields.sort();
        for (field, value) in fields {
            out.push(b' ');
            escape_into(&mut out, field);
            out.push(b':');
            escape_into(&mut out, value);
        }
        out.push(b'\n');
    }

    out
}

fn escape_into(out: &mut Vec<u8>, token: &[u8]) {
    if token.is_empty() {
        out.push(b'%');
        return;
    }
    for &byte in token {
        match byte {
            b'%' | b':' | b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c => {
                out.extend_from_slice(format!("%{:02X}", byte).as_bytes());
            }
            _ => out.push(byte),
        }
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Parses snapshot contents, skipping malformed lines.
pub fn decode(contents: &[u8]) -> (Namespaces, LoadStats) {
    let mut data = Namespaces::default();
    let mut stats = LoadStats::default();

    for (number, line) in contents.split(|&b| b == b'\n').enumerate() {
        if line.is_empty() {
            continue;
        }
        match decode_line(line, &mut data) {
            Ok(Some(TAG_STRING)) => stats.strings += 1,
            Ok(Some(TAG_LIST)) => stats.lists += 1,
            Ok(Some(TAG_HASH)) => stats.hashes += 1,
            Ok(_) => {}
            Err(reason) => {
                warn!(line = number + 1, reason, "Skipping malformed snapshot line");
                stats.skipped += 1;
            }
        }
    }

    (data, stats)
}

/// A decoded record, before it is placed in its namespace.
enum Record {
    String(Bytes),
    List(VecDeque<Bytes>),
    Hash(HashMap<Bytes, Bytes>),
}

/// Decodes one record into `data`.
///
/// Returns the tag of the key created, or `None` for an empty list or hash.
/// A later record for a key replaces any earlier one.
fn decode_line(line: &[u8], data: &mut Namespaces) -> Result<Option<u8>, &'static str> {
    let mut tokens = line.split(|&b| b == b' ');
    let head = tokens.next().unwrap_or_default();
    let (&tag, raw_key) = head.split_first().ok_or("empty record")?;
    if raw_key.is_empty() {
        return Err("missing key");
    }
    let key = unescape(raw_key);

    let record = match tag {
        TAG_STRING => Record::String(tokens.next().map(unescape).unwrap_or_default()),
        TAG_LIST => Record::List(tokens.map(unescape).collect()),
        TAG_HASH => {
            let mut fields = HashMap::new();
            for token in tokens {
                let colon = token
                    .iter()
                    .position(|&b| b == b':')
                    .ok_or("hash field without ':'")?;
                fields.insert(unescape(&token[..colon]), unescape(&token[colon + 1..]));
            }
            Record::Hash(fields)
        }
        _ => return Err("unknown record tag"),
    };

    data.strings.remove(&key);
    data.lists.remove(&key);
    data.hashes.remove(&key);

    match record {
        Record::String(value) => {
            data.strings.insert(key, value);
        }
        Record::List(items) if items.is_empty() => return Ok(None),
        Record::List(items) => {
            data.lists.insert(key, items);
        }
        Record::Hash(fields) if fields.is_empty() => return Ok(None),
        Record::Hash(fields) => {
            data.hashes.insert(key, fields);
        }
    }
    Ok(Some(tag))
}

fn unescape(token: &[u8]) -> Bytes {
    if token == b"%" {
        return Bytes::new();
    }

    let mut out = Vec::with_capacity(token.len());
    let mut i = 0;
    while i < token.len() {
        if token[i] == b'%' {
            if let Some(byte) = token.get(i + 1..i + 3).and_then(hex_byte) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(token[i]);
        i += 1;
    }
    Bytes::from(out)
}

fn hex_byte(digits: &[u8]) -> Option<u8> {
    let text = std::str::from_utf8(digits).ok()?;
    if !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(text, 16).ok()
}
