// # Key-Value Store Trait
//
// Defines the interface to the external key-value store that backs
// announcement versions.
//
// ## Purpose
//
// The store holds two kinds of data:
// - One scalar registry entry naming the current version and its expiry
// - One list per version holding serialized announcement records
//
// ## Implementations
//
// - In-memory: `MemoryKvStore` (this crate)
// - Redis: `announce-store-redis` crate
//
// ## Atomicity
//
// Plain commands are single round trips. Anything that must change more
// than one key, or must only happen if nobody else wrote in between, goes
// through [`KvStore::exec`] with a [`Transaction`].
//
// ## Usage
//
// ```rust,ignore
// use announce_core::traits::{KvStore, Transaction};
//
// let committed = store
//     .exec(
//         &Transaction::new()
//             .guard_value("V:AND:E", Some("ANNOUNCE:20261016_1,1700000000"))
//             .del("ANNOUNCE:20261016_1")
//             .set("V:AND:E", "ANNOUNCE:20261016_2,1700600000"),
//     )
//     .await?;
// ```

use async_trait::async_trait;
use std::sync::Arc;

use crate::Result;

/// Condition evaluated inside a transaction before any command runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// Scalar at `key` equals `expected` (`None` means the key is absent)
    ValueEquals {
        key: String,
        expected: Option<String>,
    },

    /// List at `key` holds fewer than `max` elements (missing counts as 0)
    ListShorterThan { key: String, max: usize },

    /// Element `index` of the list at `key` equals `expected`
    ItemEquals {
        key: String,
        index: usize,
        expected: String,
    },
}

impl Guard {
    /// Key the guard reads
    pub fn key(&self) -> &str {
        match self {
            Guard::ValueEquals { key, .. }
            | Guard::ListShorterThan { key, .. }
            | Guard::ItemEquals { key, .. } => key,
        }
    }
}

/// Write applied by a transaction once every guard holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Overwrite the scalar at `key`
    Set { key: String, value: String },
    /// Remove `key` whatever its type
    Del { key: String },
    /// Append to the list at `key`, creating it if missing
    RPush { key: String, value: String },
    /// Replace element `index` of the list at `key`
    LSet {
        key: String,
        index: usize,
        value: String,
    },
}

impl Command {
    /// Key the command writes
    pub fn key(&self) -> &str {
        match self {
            Command::Set { key, .. }
            | Command::Del { key }
            | Command::RPush { key, .. }
            | Command::LSet { key, .. } => key,
        }
    }
}

/// Guards plus commands, committed as one atomic unit
///
/// Either every guard holds and every command is applied, or nothing is
/// applied. A transaction without guards is a plain MULTI/EXEC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    pub guards: Vec<Guard>,
    pub commands: Vec<Command>,
}

impl Transaction {
    /// Create an empty transaction
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the scalar at `key` to equal `expected` (`None` = absent)
    pub fn guard_value(mut self, key: impl Into<String>, expected: Option<&str>) -> Self {
        self.guards.push(Guard::ValueEquals {
            key: key.into(),
            expected: expected.map(str::to_string),
        });
        self
    }

    /// Require the list at `key` to hold fewer than `max` elements
    pub fn guard_list_shorter_than(mut self, key: impl Into<String>, max: usize) -> Self {
        self.guards.push(Guard::ListShorterThan {
            key: key.into(),
            max,
        });
        self
    }

    /// Require element `index` of the list at `key` to equal `expected`
    pub fn guard_item(
        mut self,
        key: impl Into<String>,
        index: usize,
        expected: impl Into<String>,
    ) -> Self {
        self.guards.push(Guard::ItemEquals {
            key: key.into(),
            index,
            expected: expected.into(),
        });
        self
    }

    /// Add a pre-built guard
    pub fn with_guard(mut self, guard: Guard) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.commands.push(Command::Set {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn del(mut self, key: impl Into<String>) -> Self {
        self.commands.push(Command::Del { key: key.into() });
        self
    }

    pub fn rpush(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.commands.push(Command::RPush {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn lset(mut self, key: impl Into<String>, index: usize, value: impl Into<String>) -> Self {
        self.commands.push(Command::LSet {
            key: key.into(),
            index,
            value: value.into(),
        });
        self
    }
}

/// Trait for key-value store implementations
///
/// This trait defines the store capabilities the announcement system needs:
/// scalar get/set, list append/range/set-at-index, key deletion, and atomic
/// guarded multi-command commit.
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks, and
/// from multiple processes sharing the same backing store.
///
/// ## Implementation Guidelines
///
/// - **Verbatim errors**: backend failures surface as [`crate::Error::Store`]
///   carrying the backend's own message; never retry internally
/// - **Atomic exec**: a transaction either applies completely or not at all,
///   including when a command fails midway
/// - **No business logic**: versions, capacity and visibility are owned by
///   the registry and list, not the store
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a scalar
    ///
    /// # Returns
    ///
    /// - `Ok(Some(String))`: The stored value
    /// - `Ok(None)`: Key is absent
    /// - `Err(Error)`: Storage error (including type mismatch)
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Overwrite a scalar
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Append to a list, returning the new length
    async fn rpush(&self, key: &str, value: &str) -> Result<usize>;

    /// Length of a list (0 when absent)
    async fn llen(&self, key: &str) -> Result<usize>;

    /// Every element of a list in order (empty when absent)
    async fn lrange_all(&self, key: &str) -> Result<Vec<String>>;

    /// Replace one element of a list
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Element replaced
    /// - `Err(Error)`: Key absent, index out of range, or storage error
    async fn lset(&self, key: &str, index: usize, value: &str) -> Result<()>;

    /// Delete a key (succeeds if it didn't exist)
    async fn del(&self, key: &str) -> Result<()>;

    /// Commit a transaction atomically
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: Every guard held and every command was applied
    /// - `Ok(false)`: A guard failed; nothing was applied
    /// - `Err(Error)`: Storage error; nothing was applied
    async fn exec(&self, txn: &Transaction) -> Result<bool>;

    /// Release the underlying handle
    ///
    /// Calls made after closing fail with a store error.
    async fn close(&self) -> Result<()>;
}

/// Helper trait for constructing stores from configuration
#[async_trait]
pub trait KvStoreFactory: Send + Sync {
    /// Create a KvStore instance from configuration
    ///
    /// # Parameters
    ///
    /// - `config`: The serialized `StoreConfig` selecting this factory
    async fn create(&self, config: &serde_json::Value) -> Result<Arc<dyn KvStore>>;
}
