// # Memory KV Store
//
// In-memory implementation of KvStore.
//
// ## Purpose
//
// Provides a simple, fast store that doesn't persist across restarts.
// Useful for testing, demos, and single-process deployments where losing
// the current announcements on restart is acceptable.
//
// ## Semantics
//
// Mirrors the Redis commands the system relies on, including their
// failure modes: list commands against a scalar (or the reverse) fail with
// a WRONGTYPE error, `lset` on a missing key or out-of-range index fails.
//
// ## Atomicity
//
// `exec` holds the write lock for the whole transaction, evaluates guards
// first, then stages every command on an overlay. The overlay is published
// only when all commands succeed, so a failing command leaves no trace.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::traits::kv_store::{Command, Guard, KvStore, KvStoreFactory, Transaction};
use crate::{Error, Result};

const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// A stored value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Scalar(String),
    List(Vec<String>),
}

#[derive(Debug, Default)]
struct Inner {
    data: HashMap<String, Value>,
    closed: bool,
}

impl Inner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::store("connection closed"));
        }
        Ok(())
    }
}

/// In-memory key-value store
///
/// This implementation stores all values in a HashMap protected by a RwLock.
/// It provides no persistence across restarts. Clones share the same data.
///
/// # Example
///
/// ```rust
/// use announce_core::store::MemoryKvStore;
/// use announce_core::traits::KvStore;
///
/// #[tokio::main]
/// async fn main() -> announce_core::Result<()> {
///     let store = MemoryKvStore::new();
///
///     store.rpush("list", "a").await?;
///     store.rpush("list", "b").await?;
///     assert_eq!(store.lrange_all("list").await?, vec!["a", "b"]);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryKvStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of keys in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.data.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.data.is_empty()
    }

    /// Every key currently stored, sorted
    pub async fn keys(&self) -> Vec<String> {
        let guard = self.inner.read().await;
        let mut keys: Vec<String> = guard.data.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Clear all keys from the store
    pub async fn clear(&self) {
        self.inner.write().await.data.clear();
    }

    async fn write_one(&self, cmd: Command) -> Result<Option<Value>> {
        let mut guard = self.inner.write().await;
        guard.ensure_open()?;
        let key = cmd.key().to_string();
        let next = apply(guard.data.get(&key).cloned(), &cmd)?;
        match &next {
            Some(value) => guard.data.insert(key, value.clone()),
            None => guard.data.remove(&key),
        };
        Ok(next)
    }
}

fn as_scalar<'a>(value: Option<&'a Value>) -> Result<Option<&'a String>> {
    match value {
        None => Ok(None),
        Some(Value::Scalar(s)) => Ok(Some(s)),
        Some(Value::List(_)) => Err(Error::store(WRONG_TYPE)),
    }
}

fn as_list(value: Option<&Value>) -> Result<&[String]> {
    match value {
        None => Ok(&[]),
        Some(Value::List(items)) => Ok(items),
        Some(Value::Scalar(_)) => Err(Error::store(WRONG_TYPE)),
    }
}

fn check(data: &HashMap<String, Value>, guard: &Guard) -> Result<bool> {
    match guard {
        Guard::ValueEquals { key, expected } => {
            Ok(as_scalar(data.get(key))?.map(String::as_str) == expected.as_deref())
        }
        Guard::ListShorterThan { key, max } => Ok(as_list(data.get(key))?.len() < *max),
        Guard::ItemEquals {
            key,
            index,
            expected,
        } => Ok(as_list(data.get(key))?.get(*index) == Some(expected)),
    }
}

/// Compute the value a key holds after `cmd`
fn apply(current: Option<Value>, cmd: &Command) -> Result<Option<Value>> {
    match cmd {
        Command::Set { value, .. } => Ok(Some(Value::Scalar(value.clone()))),
        Command::Del { .. } => Ok(None),
        Command::RPush { value, .. } => match current {
            None => Ok(Some(Value::List(vec![value.clone()]))),
            Some(Value::List(mut items)) => {
                items.push(value.clone());
                Ok(Some(Value::List(items)))
            }
            Some(Value::Scalar(_)) => Err(Error::store(WRONG_TYPE)),
        },
        Command::LSet { index, value, .. } => match current {
            None => Err(Error::store("ERR no such key")),
            Some(Value::List(mut items)) => match items.get_mut(*index) {
                Some(slot) => {
                    *slot = value.clone();
                    Ok(Some(Value::List(items)))
                }
                None => Err(Error::store("ERR index out of range")),
            },
            Some(Value::Scalar(_)) => Err(Error::store(WRONG_TYPE)),
        },
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let guard = self.inner.read().await;
        guard.ensure_open()?;
        Ok(as_scalar(guard.data.get(key))?.cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.write_one(Command::Set {
            key: key.to_string(),
            value: value.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<usize> {
        let next = self
            .write_one(Command::RPush {
                key: key.to_string(),
                value: value.to_string(),
            })
            .await?;
        Ok(as_list(next.as_ref())?.len())
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        let guard = self.inner.read().await;
        guard.ensure_open()?;
        Ok(as_list(guard.data.get(key))?.len())
    }

    async fn lrange_all(&self, key: &str) -> Result<Vec<String>> {
        let guard = self.inner.read().await;
        guard.ensure_open()?;
        Ok(as_list(guard.data.get(key))?.to_vec())
    }

    async fn lset(&self, key: &str, index: usize, value: &str) -> Result<()> {
        self.write_one(Command::LSet {
            key: key.to_string(),
            index,
            value: value.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.write_one(Command::Del {
            key: key.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn exec(&self, txn: &Transaction) -> Result<bool> {
        let mut guard = self.inner.write().await;
        guard.ensure_open()?;

        for condition in &txn.guards {
            if !check(&guard.data, condition)? {
                return Ok(false);
            }
        }

        let mut staged: HashMap<String, Option<Value>> = HashMap::new();
        for cmd in &txn.commands {
            let key = cmd.key();
            let current = match staged.get(key) {
                Some(value) => value.clone(),
                None => guard.data.get(key).cloned(),
            };
            let next = apply(current, cmd)?;
            staged.insert(key.to_string(), next);
        }

        for (key, value) in staged {
            match value {
                Some(value) => guard.data.insert(key, value),
                None => guard.data.remove(&key),
            };
        }
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        self.inner.write().await.closed = true;
        Ok(())
    }
}

/// Factory for the `memory` store type
pub struct MemoryKvStoreFactory;

#[async_trait]
impl KvStoreFactory for MemoryKvStoreFactory {
    async fn create(&self, _config: &serde_json::Value) -> Result<Arc<dyn KvStore>> {
        Ok(Arc::new(MemoryKvStore::new()))
    }
}
