//! Thread-Safe Data Store with Expiry Support
//!
//! This module implements the store shared by every client connection. It
//! holds three namespaces (strings, lists and hashes) plus a table of expiry
//! deadlines, all inside one aggregate [`Keyspace`].
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                    Store                      │
//! │  ┌─────────────────────────────────────────┐  │
//! │  │           Mutex<Keyspace>               │  │
//! │  │  strings │ lists │ hashes │ expiries    │  │
//! │  └─────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Every public operation takes the lock exactly once for its full duration,
//! so each operation is linearizable on its own. No operation performs I/O
//! or awaits while holding the lock, and none re-enters it.
//!
//! ## Type Exclusivity
//!
//! A key lives in at most one namespace. Every operation checks the key's
//! current type first and fails with [`StoreError::WrongType`] on a mismatch,
//! including `SET` over a list or hash.
//!
//! ## Expiry
//!
//! Deadlines are absolute [`Instant`]s. A key whose deadline has passed is
//! removed before any operation touches it (lazy eviction), and the
//! background [`ExpirySweeper`](crate::storage::ExpirySweeper) calls
//! [`Store::purge_expired`] for keys nobody touches.

use crate::storage::glob::glob_match;
use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors reported by store operations.
///
/// The display text is the error reply sent to clients.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// The key holds a value of another type
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR no such key")]
    NoSuchKey,

    #[error("ERR index out of range")]
    IndexOutOfRange,

    /// The deadline cannot be represented
    #[error("ERR invalid expire time")]
    InvalidExpire,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The namespace a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    String,
    List,
    Hash,
}

impl KeyType {
    /// Name reported by `TYPE`.
    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::String => "string",
            KeyType::List => "list",
            KeyType::Hash => "hash",
        }
    }
}

/// The three value namespaces, without expiry state.
///
/// This is what a snapshot captures and what a load restores.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Namespaces {
    pub strings: HashMap<Bytes, Bytes>,
    pub lists: HashMap<Bytes, VecDeque<Bytes>>,
    pub hashes: HashMap<Bytes, HashMap<Bytes, Bytes>>,
}

impl Namespaces {
    /// Total number of keys across all namespaces.
    pub fn len(&self) -> usize {
        self.strings.len() + self.lists.len() + self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything guarded by the store lock.
#[derive(Debug, Default)]
struct Keyspace {
    data: Namespaces,
    /// Deadlines; every key here exists in exactly one namespace.
    expiries: HashMap<Bytes, Instant>,
}

impl Keyspace {
    fn key_type(&self, key: &[u8]) -> Option<KeyType> {
        if self.data.strings.contains_key(key) {
            Some(KeyType::String)
        } else if self.data.lists.contains_key(key) {
            Some(KeyType::List)
        } else if self.data.hashes.contains_key(key) {
            Some(KeyType::Hash)
        } else {
            None
        }
    }

    /// Fails if `key` exists with a type other than `expected`.
    fn check_type(&self, key: &[u8], expected: KeyType) -> StoreResult<()> {
        match self.key_type(key) {
            Some(actual) if actual != expected => Err(StoreError::WrongType),
            _ => Ok(()),
        }
    }

    /// Removes `key` from every namespace and the expiry table.
    fn remove(&mut self, key: &[u8]) -> bool {
        let removed = self.data.strings.remove(key).is_some()
            | self.data.lists.remove(key).is_some()
            | self.data.hashes.remove(key).is_some();
        self.expiries.remove(key);
        removed
    }

    /// Lazily evicts `key` if its deadline has passed.
    fn evict_if_expired(&mut self, key: &[u8], now: Instant) -> bool {
        match self.expiries.get(key) {
            Some(deadline) if *deadline <= now => {
                self.remove(key);
                true
            }
            _ => false,
        }
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let due: Vec<Bytes> = self
            .expiries
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &due {
            self.remove(key);
        }
        due.len()
    }

    /// Deletes a list that has become empty.
    fn drop_list_if_empty(&mut self, key: &[u8]) {
        if self.data.lists.get(key).is_some_and(VecDeque::is_empty) {
            self.remove(key);
        }
    }

    fn drop_hash_if_empty(&mut self, key: &[u8]) {
        if self.data.hashes.get(key).is_some_and(HashMap::is_empty) {
            self.remove(key);
        }
    }
}

/// Point-in-time counts, used for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub strings: usize,
    pub lists: usize,
    pub hashes: usize,
    /// Keys with a deadline
    pub expiring: usize,
    /// Keys evicted by expiry since startup
    pub expired_total: u64,
}

impl StoreStats {
    pub fn keys(&self) -> usize {
        self.strings + self.lists + self.hashes
    }
}

/// The shared data store.
///
/// Construct one per server (or per test) and share it behind an `Arc`.
///
/// # Example
///
/// ```
/// use emberkv::storage::Store;
/// use bytes::Bytes;
///
/// let store = Store::new();
/// store.set(Bytes::from("name"), Bytes::from("Ariz")).unwrap();
/// assert_eq!(store.get(b"name").unwrap(), Some(Bytes::from("Ariz")));
///
/// store.rpush(Bytes::from("queue"), vec![Bytes::from("a"), Bytes::from("b")]).unwrap();
/// assert_eq!(store.lindex(b"queue", -1).unwrap(), Some(Bytes::from("b")));
/// ```
#[derive(Debug, Default)]
pub struct Store {
    inner: Mutex<Keyspace>,
    expired_total: AtomicU64,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lock and lazily evicts `key`.
    fn lock_key(&self, key: &[u8]) -> MutexGuard<'_, Keyspace> {
        let mut keyspace = self.inner.lock();
        if keyspace.evict_if_expired(key, Instant::now()) {
            self.expired_total.fetch_add(1, Ordering::Relaxed);
        }
        keyspace
    }

    /// Runs `f` under the lock after lazily evicting `key`.
    fn with_key<T>(&self, key: &[u8], f: impl FnOnce(&mut Keyspace) -> T) -> T {
        f(&mut self.lock_key(key))
    }

    // ========================================================================
    // KEYSPACE OPERATIONS
    // ========================================================================

    /// Clears all namespaces and the expiry table.
    pub fn flush_all(&self) {
        let mut keyspace = self.inner.lock();
        *keyspace = Keyspace::default();
    }

    /// Returns all live keys matching a glob pattern (`*` for every key).
    pub fn keys(&self, pattern: &[u8]) -> Vec<Bytes> {
        let mut keyspace = self.inner.lock();
        let purged = keyspace.purge_expired(Instant::now());
        self.expired_total
            .fetch_add(purged as u64, Ordering::Relaxed);

        let data = &keyspace.data;
        data.strings
            .keys()
            .chain(data.lists.keys())
            .chain(data.hashes.keys())
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect()
    }

    /// Returns the namespace holding `key`, if any.
    pub fn key_type(&self, key: &[u8]) -> Option<KeyType> {
        self.with_key(key, |ks| ks.key_type(key))
    }

    /// Deletes `key` from whichever namespace holds it.
    ///
    /// Returns `true` iff the key was present and removed.
    pub fn delete(&self, key: &[u8]) -> bool {
        self.with_key(key, |ks| ks.remove(key))
    }

    /// Sets `key` to expire `seconds` from now.
    ///
    /// Zero or negative values set a deadline that is already due.
    pub fn expire(&self, key: &[u8], seconds: i64) -> StoreResult<()> {
        let now = Instant::now();
        let deadline = match u64::try_from(seconds) {
            Ok(secs) => now
                .checked_add(Duration::from_secs(secs))
                .ok_or(StoreError::InvalidExpire)?,
            Err(_) => now,
        };

        self.with_key(key, |ks| {
            if ks.key_type(key).is_none() {
                return Err(StoreError::NoSuchKey);
            }
            ks.expiries.insert(Bytes::copy_from_slice(key), deadline);
            Ok(())
        })
    }

    /// Moves the value and deadline of `old` to `new`, overwriting `new`.
    pub fn rename(&self, old: &[u8], new: Bytes) -> StoreResult<()> {
        let mut keyspace = self.inner.lock();
        let now = Instant::now();
        let mut evicted = keyspace.evict_if_expired(old, now) as u64;
        evicted += keyspace.evict_if_expired(&new, now) as u64;
        self.expired_total.fetch_add(evicted, Ordering::Relaxed);

        let kind = keyspace.key_type(old).ok_or(StoreError::NoSuchKey)?;
        if old == &new[..] {
            return Ok(());
        }

        keyspace.remove(&new);
        let ks = &mut *keyspace;
        match kind {
            KeyType::String => {
                if let Some(value) = ks.data.strings.remove(old) {
                    ks.data.strings.insert(new.clone(), value);
                }
            }
            KeyType::List => {
                if let Some(list) = ks.data.lists.remove(old) {
                    ks.data.lists.insert(new.clone(), list);
                }
            }
            KeyType::Hash => {
                if let Some(hash) = ks.data.hashes.remove(old) {
                    ks.data.hashes.insert(new.clone(), hash);
                }
            }
        }
        if let Some(deadline) = ks.expiries.remove(old) {
            ks.expiries.insert(new, deadline);
        }
        Ok(())
    }

    /// Removes every key whose deadline has passed.
    ///
    /// Called by the background expiry sweeper.
    pub fn purge_expired(&self) -> usize {
        let purged = self.inner.lock().purge_expired(Instant::now());
        self.expired_total
            .fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    /// Copies the live namespaces, for persistence.
    pub fn snapshot(&self) -> Namespaces {
        let mut keyspace = self.inner.lock();
        let purged = keyspace.purge_expired(Instant::now());
        self.expired_total
            .fetch_add(purged as u64, Ordering::Relaxed);
        keyspace.data.clone()
    }

    /// Replaces the whole keyspace; all deadlines are dropped.
    pub fn restore(&self, data: Namespaces) {
        let mut keyspace = self.inner.lock();
        *keyspace = Keyspace {
            data,
            expiries: HashMap::new(),
        };
    }

    pub fn stats(&self) -> StoreStats {
        let keyspace = self.inner.lock();
        StoreStats {
            strings: keyspace.data.strings.len(),
            lists: keyspace.data.lists.len(),
            hashes: keyspace.data.hashes.len(),
            expiring: keyspace.expiries.len(),
            expired_total: self.expired_total.load(Ordering::Relaxed),
        }
    }

    // ========================================================================
    // STRING OPERATIONS
    // ========================================================================

    /// Sets a string value, clearing any previous deadline.
    pub fn set(&self, key: Bytes, value: Bytes) -> StoreResult<()> {
        let mut ks = self.lock_key(&key);
        ks.check_type(&key, KeyType::String)?;
        ks.expiries.remove(&key);
        ks.data.strings.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        self.with_key(key, |ks| {
            ks.check_type(key, KeyType::String)?;
            Ok(ks.data.strings.get(key).cloned())
        })
    }

    // ========================================================================
    // LIST OPERATIONS
    // ========================================================================

    /// Pushes values to the head, one at a time, so `LPUSH k a b` yields `[b, a]`.
    ///
    /// Returns the length of the list after the push.
    pub fn lpush(&self, key: Bytes, values: Vec<Bytes>) -> StoreResult<usize> {
        let mut ks = self.lock_key(&key);
        ks.check_type(&key, KeyType::List)?;
        let list = ks.data.lists.entry(key).or_default();
        for value in values {
            list.push_front(value);
        }
        Ok(list.len())
    }

    /// Pushes values to the tail in order.
    pub fn rpush(&self, key: Bytes, values: Vec<Bytes>) -> StoreResult<usize> {
        let mut ks = self.lock_key(&key);
        ks.check_type(&key, KeyType::List)?;
        let list = ks.data.lists.entry(key).or_default();
        list.extend(values);
        Ok(list.len())
    }

    pub fn lpop(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        self.with_key(key, |ks| {
            ks.check_type(key, KeyType::List)?;
            let value = ks.data.lists.get_mut(key).and_then(VecDeque::pop_front);
            ks.drop_list_if_empty(key);
            Ok(value)
        })
    }

    pub fn rpop(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        self.with_key(key, |ks| {
            ks.check_type(key, KeyType::List)?;
            let value = ks.data.lists.get_mut(key).and_then(VecDeque::pop_back);
            ks.drop_list_if_empty(key);
            Ok(value)
        })
    }

    /// Length of the list, 0 if absent.
    pub fn llen(&self, key: &[u8]) -> StoreResult<usize> {
        self.with_key(key, |ks| {
            ks.check_type(key, KeyType::List)?;
            Ok(ks.data.lists.get(key).map_or(0, VecDeque::len))
        })
    }

    /// All elements, head first.
    pub fn lget(&self, key: &[u8]) -> StoreResult<Vec<Bytes>> {
        self.with_key(key, |ks| {
            ks.check_type(key, KeyType::List)?;
            Ok(ks
                .data
                .lists
                .get(key)
                .map(|list| list.iter().cloned().collect())
                .unwrap_or_default())
        })
    }

    /// Element at `index`; negative indices count from the tail.
    pub fn lindex(&self, key: &[u8], index: i64) -> StoreResult<Option<Bytes>> {
        self.with_key(key, |ks| {
            ks.check_type(key, KeyType::List)?;
            Ok(ks.data.lists.get(key).and_then(|list| {
                normalize_index(index, list.len()).and_then(|i| list.get(i).cloned())
            }))
        })
    }

    pub fn lset(&self, key: &[u8], index: i64, value: Bytes) -> StoreResult<()> {
        self.with_key(key, |ks| {
            ks.check_type(key, KeyType::List)?;
            let list = ks.data.lists.get_mut(key).ok_or(StoreError::NoSuchKey)?;
            let i = normalize_index(index, list.len()).ok_or(StoreError::IndexOutOfRange)?;
            list[i] = value;
            Ok(())
        })
    }

    /// Removes elements equal to `value`.
    ///
    /// - `count > 0`: up to `count` matches, scanning head to tail
    /// - `count < 0`: up to `|count|` matches, scanning tail to head
    /// - `count == 0`: every match
    ///
    /// Remaining elements keep their relative order. Returns the number removed.
    pub fn lrem(&self, key: &[u8], count: i64, value: &[u8]) -> StoreResult<usize> {
        self.with_key(key, |ks| {
            ks.check_type(key, KeyType::List)?;
            let removed = match ks.data.lists.get_mut(key) {
                Some(list) => remove_matches(list, count, value),
                None => 0,
            };
            ks.drop_list_if_empty(key);
            Ok(removed)
        })
    }

    // ========================================================================
    // HASH OPERATIONS
    // ========================================================================

    /// Sets one field. Returns `true` if the field is new.
    pub fn hset(&self, key: Bytes, field: Bytes, value: Bytes) -> StoreResult<bool> {
        let mut ks = self.lock_key(&key);
        ks.check_type(&key, KeyType::Hash)?;
        let hash = ks.data.hashes.entry(key).or_default();
        Ok(hash.insert(field, value).is_none())
    }

    /// Sets several fields at once.
    pub fn hmset(&self, key: Bytes, pairs: Vec<(Bytes, Bytes)>) -> StoreResult<()> {
        let mut ks = self.lock_key(&key);
        ks.check_type(&key, KeyType::Hash)?;
        if !pairs.is_empty() {
            ks.data.hashes.entry(key).or_default().extend(pairs);
        }
        Ok(())
    }

    pub fn hget(&self, key: &[u8], field: &[u8]) -> StoreResult<Option<Bytes>> {
        self.with_key(key, |ks| {
            ks.check_type(key, KeyType::Hash)?;
            Ok(ks
                .data
                .hashes
                .get(key)
                .and_then(|hash| hash.get(field).cloned()))
        })
    }

    pub fn hexists(&self, key: &[u8], field: &[u8]) -> StoreResult<bool> {
        self.with_key(key, |ks| {
            ks.check_type(key, KeyType::Hash)?;
            Ok(ks
                .data
                .hashes
                .get(key)
                .is_some_and(|hash| hash.contains_key(field)))
        })
    }

    /// Removes one field. Returns `true` if it existed.
    pub fn hdel(&self, key: &[u8], field: &[u8]) -> StoreResult<bool> {
        self.with_key(key, |ks| {
            ks.check_type(key, KeyType::Hash)?;
            let removed = ks
                .data
                .hashes
                .get_mut(key)
                .is_some_and(|hash| hash.remove(field).is_some());
            ks.drop_hash_if_empty(key);
            Ok(removed)
        })
    }

    pub fn hgetall(&self, key: &[u8]) -> StoreResult<Vec<(Bytes, Bytes)>> {
        self.with_key(key, |ks| {
            ks.check_type(key, KeyType::Hash)?;
            Ok(ks
                .data
                .hashes
                .get(key)
                .map(|hash| {
                    hash.iter()
                        .map(|(field, value)| (field.clone(), value.clone()))
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    pub fn hkeys(&self, key: &[u8]) -> StoreResult<Vec<Bytes>> {
        Ok(self.hgetall(key)?.into_iter().map(|(field, _)| field).collect())
    }

    pub fn hvals(&self, key: &[u8]) -> StoreResult<Vec<Bytes>> {
        Ok(self.hgetall(key)?.into_iter().map(|(_, value)| value).collect())
    }

    pub fn hlen(&self, key: &[u8]) -> StoreResult<usize> {
        self.with_key(key, |ks| {
            ks.check_type(key, KeyType::Hash)?;
            Ok(ks.data.hashes.get(key).map_or(0, HashMap::len))
        })
    }
}

/// Maps a possibly negative index onto `0..len`.
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let index = if index < 0 { len + index } else { index };
    if (0..len).contains(&index) {
        usize::try_from(index).ok()
    } else {
        None
    }
}

/// Removes up to `|count|` elements equal to `value` (all of them for 0).
fn remove_matches(list: &mut VecDeque<Bytes>, count: i64, value: &[u8]) -> usize {
    let limit = match count {
        0 => usize::MAX,
        n => usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX),
    };

    let mut doomed = vec![false; list.len()];
    let mut removed = 0;
    let mut mark = |i: usize| {
        if removed < limit && &list[i][..] == value {
            doomed[i] = true;
            removed += 1;
        }
    };
    if count < 0 {
        (0..list.len()).rev().for_each(&mut mark);
    } else {
        (0..list.len()).for_each(&mut mark);
    }

    let mut position = 0;
    list.retain(|_| {
        let keep = !doomed[position];
        position += 1;
        keep
    });
    removed
}

// Introspection used by tests across the crate.
#[cfg(test)]
impl Store {
    pub(crate) fn exists(&self, key: &[u8]) -> bool {
        self.key_type(key).is_some()
    }

    /// Remaining time before `key` expires, if it has a deadline.
    pub(crate) fn ttl(&self, key: &[u8]) -> Option<Duration> {
        self.with_key(key, |ks| {
            ks.expiries
                .get(key)
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
        })
    }
}
