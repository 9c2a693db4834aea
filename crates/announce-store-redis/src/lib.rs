// # Redis Store
//
// Redis backend for the announcement store.
//
// ## Transactions
//
// Guarded transactions run as one Lua script, so guards and writes are
// evaluated without any other client interleaving. The script checks every
// guard, then dry-runs the commands against the key types and list lengths
// it observes (a failing `LSET` halfway through would otherwise leave the
// earlier writes applied), and only then writes.
//
// Arguments travel as `KEYS[i]` (one per guard, then one per command) and
// three `ARGV` slots per entry after the two counts:
//
// ```text
// ARGV = [guards, commands, op, a, b, op, a, b, ...]
// ```
//
// ## Errors
//
// Redis errors are surfaced as `Error::Store` with Redis' own message and
// are never retried here.

use async_trait::async_trait;
use announce_core::traits::{Command, Guard, KvStore, KvStoreFactory, Transaction};
use announce_core::{Error, Result};
use redis::aio::MultiplexedConnection;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

const TRANSACTION_SCRIPT: &str = r#"
local guards = tonumber(ARGV[1])
local commands = tonumber(ARGV[2])

local function entry(i)
  local base = 2 + (i - 1) * 3
  return ARGV[base + 1], ARGV[base + 2], ARGV[base + 3]
end

for i = 1, guards do
  local op, a, b = entry(i)
  local key = KEYS[i]
  if op == 'eq' then
    local value = redis.call('GET', key)
    if a == '0' then
      if value then return 0 end
    elseif value ~= b then
      return 0
    end
  elseif op == 'lt' then
    if redis.call('LLEN', key) >= tonumber(a) then return 0 end
  elseif op == 'item' then
    if redis.call('LINDEX', key, a) ~= b then return 0 end
  else
    return redis.error_reply('ERR unknown guard ' .. op)
  end
end

local kinds, lens = {}, {}
local function kind(key)
  if kinds[key] == nil then
    kinds[key] = redis.call('TYPE', key)['ok']
    if kinds[key] == 'list' then
      lens[key] = redis.call('LLEN', key)
    else
      lens[key] = 0
    end
  end
  return kinds[key]
end

local wrongtype = 'WRONGTYPE Operation against a key holding the wrong kind of value'
for i = guards + 1, guards + commands do
  local op, a, b = entry(i)
  local key = KEYS[i]
  if op == 'set' then
    kinds[key] = 'string'
    lens[key] = 0
  elseif op == 'del' then
    kinds[key] = 'none'
    lens[key] = 0
  elseif op == 'rpush' then
    local k = kind(key)
    if k ~= 'list' and k ~= 'none' then return redis.error_reply(wrongtype) end
    kinds[key] = 'list'
    lens[key] = lens[key] + 1
  elseif op == 'lset' then
    local k = kind(key)
    if k == 'none' then return redis.error_reply('ERR no such key') end
    if k ~= 'list' then return redis.error_reply(wrongtype) end
    if tonumber(a) >= lens[key] then return redis.error_reply('ERR index out of range') end
  else
    return redis.error_reply('ERR unknown command ' .. op)
  end
end

for i = guards + 1, guards + commands do
  local op, a, b = entry(i)
  local key = KEYS[i]
  if op == 'set' then
    redis.call('SET', key, a)
  elseif op == 'del' then
    redis.call('DEL', key)
  elseif op == 'rpush' then
    redis.call('RPUSH', key, a)
  elseif op == 'lset' then
    redis.call('LSET', key, a, b)
  end
end
return 1
"#;

/// A transaction flattened into script keys and arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTransaction {
    pub keys: Vec<String>,
    pub args: Vec<String>,
}

/// Flatten a transaction for [`TRANSACTION_SCRIPT`]
pub fn encode_transaction(txn: &Transaction) -> EncodedTransaction {
    let mut keys = Vec::with_capacity(txn.guards.len() + txn.commands.len());
    let mut args = vec![txn.guards.len().to_string(), txn.commands.len().to_string()];

    let mut push = |key: &str, op: &str, a: String, b: String| {
        keys.push(key.to_string());
        args.extend([op.to_string(), a, b]);
    };

    for guard in &txn.guards {
        match guard {
            Guard::ValueEquals { key, expected } => match expected {
                Some(value) => push(key, "eq", "1".into(), value.clone()),
                None => push(key, "eq", "0".into(), String::new()),
            },
            Guard::ListShorterThan { key, max } => push(key, "lt", max.to_string(), String::new()),
            Guard::ItemEquals {
                key,
                index,
                expected,
            } => push(key, "item", index.to_string(), expected.clone()),
        }
    }

    for command in &txn.commands {
        match command {
            Command::Set { key, value } => push(key, "set", value.clone(), String::new()),
            Command::Del { key } => push(key, "del", String::new(), String::new()),
            Command::RPush { key, value } => push(key, "rpush", value.clone(), String::new()),
            Command::LSet { key, index, value } => {
                push(key, "lset", index.to_string(), value.clone())
            }
        }
    }

    EncodedTransaction { keys, args }
}

fn store_error(e: redis::RedisError) -> Error {
    Error::store(e.to_string())
}

/// Redis-backed [`KvStore`]
pub struct RedisKvStore {
    conn: RwLock<Option<MultiplexedConnection>>,
    script: redis::Script,
}

impl std::fmt::Debug for RedisKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKvStore")
            .field("script", &self.script.get_hash())
            .finish()
    }
}

impl RedisKvStore {
    /// Connect to `url`
    ///
    /// # Parameters
    ///
    /// - `url`: Connection URL, e.g. `redis://127.0.0.1:6379`
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(store_error)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(store_error)?;
        info!("Connected to Redis");
        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing multiplexed connection
    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn: RwLock::new(Some(conn)),
            script: redis::Script::new(TRANSACTION_SCRIPT),
        }
    }

    async fn conn(&self) -> Result<MultiplexedConnection> {
        self.conn
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::store("connection closed"))
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<usize> {
        let mut conn = self.conn().await?;
        let len: usize = redis::cmd("RPUSH")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(len)
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn().await?;
        let len: usize = redis::cmd("LLEN")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(len)
    }

    async fn lrange_all(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let items: Vec<String> = redis::cmd("LRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(items)
    }

    async fn lset(&self, key: &str, index: usize, value: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("LSET")
            .arg(key)
            .arg(index)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn exec(&self, txn: &Transaction) -> Result<bool> {
        let mut conn = self.conn().await?;
        let encoded = encode_transaction(txn);

        let mut invocation = self.script.prepare_invoke();
        for key in &encoded.keys {
            invocation.key(key);
        }
        for arg in &encoded.args {
            invocation.arg(arg);
        }

        let committed: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        debug!(
            "Transaction with {} guards and {} commands: {}",
            txn.guards.len(),
            txn.commands.len(),
            if committed == 1 { "committed" } else { "guard failed" }
        );
        Ok(committed == 1)
    }

    async fn close(&self) -> Result<()> {
        if self.conn.write().await.take().is_some() {
            info!("Redis connection released");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RedisStoreConfig {
    url: String,
}

/// Factory for the `redis` store type
pub struct RedisKvStoreFactory;

#[async_trait]
impl KvStoreFactory for RedisKvStoreFactory {
    async fn create(&self, config: &serde_json::Value) -> Result<Arc<dyn KvStore>> {
        let config = RedisStoreConfig::deserialize(config)
            .map_err(|e| Error::config(format!("Invalid redis store config: {}", e)))?;
        Ok(Arc::new(RedisKvStore::connect(&config.url).await?))
    }
}

/// Register the `redis` store type
pub fn register(registry: &announce_core::StoreRegistry) {
    registry.register_store("redis", Box::new(RedisKvStoreFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use announce_core::StoreRegistry;

    #[test]
    fn test_encode_rotation() {
        let txn = Transaction::new()
            .guard_value("V:AND:E", Some("ANNOUNCE:20261016_1,100"))
            .del("ANNOUNCE:20261016_1")
            .del("ANNOUNCE:20261016_2")
            .set("V:AND:E", "ANNOUNCE:20261016_2,200");

        let encoded = encode_transaction(&txn);
        assert_eq!(
            encoded.keys,
            ["V:AND:E", "ANNOUNCE:20261016_1", "ANNOUNCE:20261016_2", "V:AND:E"]
        );
        assert_eq!(
            encoded.args,
            [
                "1", "3",
                "eq", "1", "ANNOUNCE:20261016_1,100",
                "del", "", "",
                "del", "", "",
                "set", "ANNOUNCE:20261016_2,200", "",
            ]
        );
    }

    #[test]
    fn test_encode_absent_guard_and_list_ops() {
        let txn = Transaction::new()
            .guard_value("reg", None)
            .guard_list_shorter_than("list", 30)
            .guard_item("list", 2, "old")
            .rpush("list", "new")
            .lset("list", 2, "hidden");

        let encoded = encode_transaction(&txn);
        assert_eq!(encoded.keys.len(), 5);
        assert_eq!(&encoded.args[..2], ["3", "2"]);
        assert_eq!(&encoded.args[2..5], ["eq", "0", ""]);
        assert_eq!(&encoded.args[5..8], ["lt", "30", ""]);
        assert_eq!(&encoded.args[8..11], ["item", "2", "old"]);
        assert_eq!(&encoded.args[11..14], ["rpush", "new", ""]);
        assert_eq!(&encoded.args[14..17], ["lset", "2", "hidden"]);
    }

    #[test]
    fn test_register() {
        let registry = StoreRegistry::with_builtin();
        register(&registry);
        assert_eq!(registry.list_stores(), ["memory", "redis"]);
    }

    #[tokio::test]
    async fn test_factory_rejects_bad_config() {
        let result = RedisKvStoreFactory
            .create(&serde_json::json!({"type": "redis"}))
            .await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    // Live tests: REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored

    async fn live() -> (RedisKvStore, String) {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let store = RedisKvStore::connect(&url).await.expect("redis reachable");
        (store, format!("announce-test:{}:", uuid::Uuid::now_v7()))
    }

    #[tokio::test]
    #[ignore]
    async fn test_live_scalar_and_list() {
        let (store, ns) = live().await;
        let (k, l) = (format!("{}k", ns), format!("{}l", ns));

        store.set(&k, "v").await.unwrap();
        assert_eq!(store.get(&k).await.unwrap(), Some("v".to_string()));
        assert_eq!(store.rpush(&l, "a").await.unwrap(), 1);
        assert_eq!(store.rpush(&l, "b").await.unwrap(), 2);
        store.lset(&l, 1, "z").await.unwrap();
        assert_eq!(store.lrange_all(&l).await.unwrap(), ["a", "z"]);
        assert!(matches!(store.get(&l).await, Err(Error::Store(msg)) if msg.contains("WRONGTYPE")));

        store.del(&k).await.unwrap();
        store.del(&l).await.unwrap();
        assert_eq!(store.llen(&l).await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore]
    async fn test_live_guarded_transaction() {
        let (store, ns) = live().await;
        let (reg, list) = (format!("{}reg", ns), format!("{}list", ns));

        let create = Transaction::new().guard_value(reg.as_str(), None).set(reg.as_str(), "v1");
        assert!(store.exec(&create).await.unwrap());
        assert!(!store.exec(&create).await.unwrap());

        let push = Transaction::new()
            .guard_value(reg.as_str(), Some("v1"))
            .guard_list_shorter_than(list.as_str(), 1)
            .rpush(list.as_str(), "x");
        assert!(store.exec(&push).await.unwrap());
        assert!(!store.exec(&push).await.unwrap());
        assert_eq!(store.llen(&list).await.unwrap(), 1);

        store.del(&reg).await.unwrap();
        store.del(&list).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_live_failed_command_applies_nothing() {
        let (store, ns) = live().await;
        let (a, b) = (format!("{}a", ns), format!("{}b", ns));

        let txn = Transaction::new().set(a.as_str(), "1").lset(b.as_str(), 0, "x");
        assert!(matches!(store.exec(&txn).await, Err(Error::Store(msg)) if msg.contains("no such key")));
        assert_eq!(store.get(&a).await.unwrap(), None);

        store.close().await.unwrap();
        assert!(store.get(&a).await.is_err());
    }
}
