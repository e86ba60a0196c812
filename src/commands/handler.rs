//! Command Handler Module
//!
//! Dispatches one decoded command (its token list) to the store and renders
//! the result as a [`Reply`].
//!
//! ## Supported Commands
//!
//! ### Keyspace
//! - `PING` - Test connection
//! - `ECHO message` - Echo message
//! - `FLUSHALL` - Clear every namespace
//! - `KEYS [pattern]` - List live keys, optionally filtered by a glob pattern
//! - `TYPE key` - "string", "list", "hash" or "none"
//! - `DEL key` / `UNLINK key` - Delete a key of any type
//! - `EXPIRE key seconds` - Set a deadline
//! - `RENAME key newkey` - Move a key with its deadline
//!
//! ### Strings
//! - `SET key value`, `GET key`
//!
//! ### Lists
//! - `LPUSH key value [value ...]`, `RPUSH key value [value ...]`
//! - `LPOP key`, `RPOP key`, `LLEN key`, `LGET key`
//! - `LREM key count value`, `LINDEX key index`, `LSET key index value`
//!
//! ### Hashes
//! - `HSET key field value`, `HGET key field`, `HEXISTS key field`
//! - `HDEL key field`, `HGETALL key`, `HKEYS key`, `HVALS key`, `HLEN key`
//! - `HMSET key field value [field value ...]`
//!
//! Every handler checks its own minimum arity. Surplus arguments are ignored,
//! except for `HMSET` where fields and values must pair up.

use crate::protocol::Reply;
use crate::storage::{Store, StoreError};
use bytes::Bytes;
use std::sync::Arc;
use tracing::trace;

/// Handles commands by dispatching them to the store.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    store: Arc<Store>,
}

impl CommandHandler {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Executes one command and returns exactly one reply.
    ///
    /// # Example
    ///
    /// ```
    /// use emberkv::commands::CommandHandler;
    /// use emberkv::protocol::{decode_command, Reply};
    /// use emberkv::storage::Store;
    /// use std::sync::Arc;
    ///
    /// let handler = CommandHandler::new(Arc::new(Store::new()));
    /// let reply = handler.execute(decode_command(b"type missing\r\n"));
    /// assert_eq!(reply, Reply::simple_string("none"));
    /// ```
    pub fn execute(&self, tokens: Vec<Bytes>) -> Reply {
        let Some((name, args)) = tokens.split_first() else {
            return Reply::error("ERR empty command");
        };

        let cmd = String::from_utf8_lossy(name).to_ascii_uppercase();
        trace!(command = %cmd, args = args.len(), "Dispatching command");
        self.dispatch(&cmd, args)
    }

    fn dispatch(&self, cmd: &str, args: &[Bytes]) -> Reply {
        match cmd {
            // Keyspace commands
            "PING" => Reply::pong(),
            "ECHO" => self.cmd_echo(args),
            "FLUSHALL" => self.cmd_flushall(),
            "KEYS" => self.cmd_keys(args),
            "TYPE" => self.cmd_type(args),
            "DEL" | "UNLINK" => self.cmd_del(cmd, args),
            "EXPIRE" => self.cmd_expire(args),
            "RENAME" => self.cmd_rename(args),

            // String commands
            "SET" => self.cmd_set(args),
            "GET" => self.cmd_get(args),

            // List commands
            "LPUSH" => self.cmd_push(cmd, args, Store::lpush),
            "RPUSH" => self.cmd_push(cmd, args, Store::rpush),
            "LPOP" => self.cmd_pop(cmd, args, Store::lpop),
            "RPOP" => self.cmd_pop(cmd, args, Store::rpop),
            "LLEN" => self.cmd_llen(args),
            "LGET" => self.cmd_lget(args),
            "LREM" => self.cmd_lrem(args),
            "LINDEX" => self.cmd_lindex(args),
            "LSET" => self.cmd_lset(args),

            // Hash commands
            "HSET" => self.cmd_hset(args),
            "HGET" => self.cmd_hget(args),
            "HEXISTS" => self.cmd_hexists(args),
            "HDEL" => self.cmd_hdel(args),
            "HGETALL" => self.cmd_hgetall(args),
            "HKEYS" => self.cmd_hkeys(args),
            "HVALS" => self.cmd_hvals(args),
            "HLEN" => self.cmd_hlen(args),
            "HMSET" => self.cmd_hmset(args),

            _ => {
                // Error replies are line-framed; the name is client-supplied.
                let name = cmd.replace(['\r', '\n'], " ");
                Reply::error(format!("ERR unknown command '{}'", name))
            }
        }
    }

    // ========================================================================
    // Keyspace Commands
    // ========================================================================

    /// ECHO message
    fn cmd_echo(&self, args: &[Bytes]) -> Reply {
        let Some(message) = args.first() else {
            return wrong_args("ECHO");
        };

        // A simple string cannot carry CR/LF, so fall back to a bulk string.
        match std::str::from_utf8(message) {
            Ok(text) if !text.contains(['\r', '\n']) => Reply::simple_string(text),
            _ => Reply::bulk_string(message.clone()),
        }
    }

    /// FLUSHALL
    fn cmd_flushall(&self) -> Reply {
        self.store.flush_all();
        Reply::ok()
    }

    /// KEYS [pattern]
    fn cmd_keys(&self, args: &[Bytes]) -> Reply {
        let pattern = args.first().map_or(&b"*"[..], |p| &p[..]);
        Reply::bulk_array(self.store.keys(pattern))
    }

    /// TYPE key
    fn cmd_type(&self, args: &[Bytes]) -> Reply {
        let Some(key) = args.first() else {
            return wrong_args("TYPE");
        };

        let name = self.store.key_type(key).map_or("none", |kind| kind.as_str());
        Reply::simple_string(name)
    }

    /// DEL key, UNLINK key
    fn cmd_del(&self, cmd: &str, args: &[Bytes]) -> Reply {
        let Some(key) = args.first() else {
            return wrong_args(cmd);
        };

        Reply::integer(self.store.delete(key) as i64)
    }

    /// EXPIRE key seconds
    fn cmd_expire(&self, args: &[Bytes]) -> Reply {
        let [key, seconds, ..] = args else {
            return wrong_args("EXPIRE");
        };
        let Some(seconds) = parse_integer(seconds) else {
            return not_an_integer();
        };

        match self.store.expire(key, seconds) {
            Ok(()) => Reply::ok(),
            Err(e) => store_error(e),
        }
    }

    /// RENAME key newkey
    fn cmd_rename(&self, args: &[Bytes]) -> Reply {
        let [old, new, ..] = args else {
            return wrong_args("RENAME");
        };

        match self.store.rename(old, new.clone()) {
            Ok(()) => Reply::ok(),
            Err(e) => store_error(e),
        }
    }

    // ========================================================================
    // String Commands
    // ========================================================================

    /// SET key value
    fn cmd_set(&self, args: &[Bytes]) -> Reply {
        let [key, value, ..] = args else {
            return wrong_args("SET");
        };

        match self.store.set(key.clone(), value.clone()) {
            Ok(()) => Reply::ok(),
            Err(e) => store_error(e),
        }
    }

    /// GET key
    fn cmd_get(&self, args: &[Bytes]) -> Reply {
        let Some(key) = args.first() else {
            return wrong_args("GET");
        };

        match self.store.get(key) {
            Ok(value) => Reply::optional_bulk(value),
            Err(e) => store_error(e),
        }
    }

    // ========================================================================
    // List Commands
    // ========================================================================

    /// LPUSH key value [value ...], RPUSH key value [value ...]
    fn cmd_push(
        &self,
        cmd: &str,
        args: &[Bytes],
        push: fn(&Store, Bytes, Vec<Bytes>) -> Result<usize, StoreError>,
    ) -> Reply {
        let [key, values @ ..] = args else {
            return wrong_args(cmd);
        };
        if values.is_empty() {
            return wrong_args(cmd);
        }

        match push(self.store.as_ref(), key.clone(), values.to_vec()) {
            Ok(len) => Reply::integer(len as i64),
            Err(e) => store_error(e),
        }
    }

    /// LPOP key, RPOP key
    fn cmd_pop(
        &self,
        cmd: &str,
        args: &[Bytes],
        pop: fn(&Store, &[u8]) -> Result<Option<Bytes>, StoreError>,
    ) -> Reply {
        let Some(key) = args.first() else {
            return wrong_args(cmd);
        };

        match pop(self.store.as_ref(), key) {
            Ok(value) => Reply::optional_bulk(value),
            Err(e) => store_error(e),
        }
    }

    /// LLEN key
    fn cmd_llen(&self, args: &[Bytes]) -> Reply {
        let Some(key) = args.first() else {
            return wrong_args("LLEN");
        };

        match self.store.llen(key) {
            Ok(len) => Reply::integer(len as i64),
            Err(e) => store_error(e),
        }
    }

    /// LGET key
    fn cmd_lget(&self, args: &[Bytes]) -> Reply {
        let Some(key) = args.first() else {
            return wrong_args("LGET");
        };

        match self.store.lget(key) {
            Ok(items) => Reply::bulk_array(items),
            Err(e) => store_error(e),
        }
    }

    /// LREM key count value
    fn cmd_lrem(&self, args: &[Bytes]) -> Reply {
        let [key, count, value, ..] = args else {
            return wrong_args("LREM");
        };
        let Some(count) = parse_integer(count) else {
            return not_an_integer();
        };

        match self.store.lrem(key, count, value) {
            Ok(removed) => Reply::integer(removed as i64),
            Err(e) => store_error(e),
        }
    }

    /// LINDEX key index
    fn cmd_lindex(&self, args: &[Bytes]) -> Reply {
        let [key, index, ..] = args else {
            return wrong_args("LINDEX");
        };
        let Some(index) = parse_integer(index) else {
            return not_an_integer();
        };

        match self.store.lindex(key, index) {
            Ok(value) => Reply::optional_bulk(value),
            Err(e) => store_error(e),
        }
    }

    /// LSET key index value
    fn cmd_lset(&self, args: &[Bytes]) -> Reply {
        let [key, index, value, ..] = args else {
            return wrong_args("LSET");
        };
        let Some(index) = parse_integer(index) else {
            return not_an_integer();
        };

        match self.store.lset(key, index, value.clone()) {
            Ok(()) => Reply::ok(),
            Err(e) => store_error(e),
        }
    }

    // ========================================================================
    // Hash Commands
    // ========================================================================

    /// HSET key field value
    ///
    /// Always replies 1, whether the field was new or overwritten.
    fn cmd_hset(&self, args: &[Bytes]) -> Reply {
        let [key, field, value, ..] = args else {
            return wrong_args("HSET");
        };

        match self.store.hset(key.clone(), field.clone(), value.clone()) {
            Ok(_) => Reply::integer(1),
            Err(e) => store_error(e),
        }
    }

    /// HGET key field
    fn cmd_hget(&self, args: &[Bytes]) -> Reply {
        let [key, field, ..] = args else {
            return wrong_args("HGET");
        };

        match self.store.hget(key, field) {
            Ok(value) => Reply::optional_bulk(value),
            Err(e) => store_error(e),
        }
    }

    /// HEXISTS key field
    fn cmd_hexists(&self, args: &[Bytes]) -> Reply {
        let [key, field, ..] = args else {
            return wrong_args("HEXISTS");
        };

        match self.store.hexists(key, field) {
            Ok(exists) => Reply::integer(exists as i64),
            Err(e) => store_error(e),
        }
    }

    /// HDEL key field
    fn cmd_hdel(&self, args: &[Bytes]) -> Reply {
        let [key, field, ..] = args else {
            return wrong_args("HDEL");
        };

        match self.store.hdel(key, field) {
            Ok(removed) => Reply::integer(removed as i64),
            Err(e) => store_error(e),
        }
    }

    /// HGETALL key
    fn cmd_hgetall(&self, args: &[Bytes]) -> Reply {
        let Some(key) = args.first() else {
            return wrong_args("HGETALL");
        };

        match self.store.hgetall(key) {
            Ok(pairs) => Reply::bulk_array(
                pairs
                    .into_iter()
                    .flat_map(|(field, value)| [field, value]),
            ),
            Err(e) => store_error(e),
        }
    }

    /// HKEYS key
    fn cmd_hkeys(&self, args: &[Bytes]) -> Reply {
        let Some(key) = args.first() else {
            return wrong_args("HKEYS");
        };

        match self.store.hkeys(key) {
            Ok(fields) => Reply::bulk_array(fields),
            Err(e) => store_error(e),
        }
    }

    /// HVALS key
    fn cmd_hvals(&self, args: &[Bytes]) -> Reply {
        let Some(key) = args.first() else {
            return wrong_args("HVALS");
        };

        match self.store.hvals(key) {
            Ok(values) => Reply::bulk_array(values),
            Err(e) => store_error(e),
        }
    }

    /// HLEN key
    fn cmd_hlen(&self, args: &[Bytes]) -> Reply {
        let Some(key) = args.first() else {
            return wrong_args("HLEN");
        };

        match self.store.hlen(key) {
            Ok(len) => Reply::integer(len as i64),
            Err(e) => store_error(e),
        }
    }

    /// HMSET key field value [field value ...]
    fn cmd_hmset(&self, args: &[Bytes]) -> Reply {
        let [key, rest @ ..] = args else {
            return wrong_args("HMSET");
        };
        if rest.is_empty() || rest.len() % 2 != 0 {
            return wrong_args("HMSET");
        }

        let pairs = rest
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();

        match self.store.hmset(key.clone(), pairs) {
            Ok(()) => Reply::ok(),
            Err(e) => store_error(e),
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

fn wrong_args(cmd: &str) -> Reply {
    Reply::error(format!(
        "ERR wrong number of arguments for '{}' command",
        cmd.to_ascii_lowercase()
    ))
}

fn not_an_integer() -> Reply {
    Reply::error("ERR value is not an integer or out of range")
}

fn store_error(err: StoreError) -> Reply {
    Reply::error(err.to_string())
}

/// Parses a signed decimal argument.
fn parse_integer(arg: &[u8]) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}
