//! Plugin-based store registry
//!
//! Store backends register a factory under a type name; the service host
//! picks one from configuration instead of matching on backend types.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use announce_core::backends::StoreRegistry;
//! use announce_core::config::StoreConfig;
//!
//! let registry = StoreRegistry::with_builtin();
//! announce_store_redis::register(&registry);
//!
//! let config = StoreConfig::Redis { url: "redis://127.0.0.1:6379".into() };
//! let store = registry.create_store(&config).await?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::store::MemoryKvStoreFactory;
use crate::traits::{KvStore, KvStoreFactory};

type Factories = HashMap<String, Arc<dyn KvStoreFactory>>;

/// Registry of store factories keyed by type name
///
/// Interior mutability lets backends register through a shared reference.
#[derive(Default)]
pub struct StoreRegistry {
    stores: RwLock<Factories>,
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("stores", &self.list_stores())
            .finish()
    }
}

impl StoreRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the stores this crate ships (`memory`)
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register_store("memory", Box::new(MemoryKvStoreFactory));
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, Factories> {
        self.stores.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Factories> {
        self.stores.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a store factory
    ///
    /// # Parameters
    ///
    /// - `name`: Store type name (e.g., "memory", "redis")
    /// - `factory`: Factory object for creating store instances
    pub fn register_store(&self, name: impl Into<String>, factory: Box<dyn KvStoreFactory>) {
        self.write().insert(name.into(), Arc::from(factory));
    }

    /// Create a store from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Arc<dyn KvStore>)`: Created store instance
    /// - `Err(Error)`: If the store type is not registered or creation fails
    pub async fn create_store(&self, config: &StoreConfig) -> Result<Arc<dyn KvStore>> {
        config.validate()?;
        let store_type = config.type_name();

        let factory = self
            .read()
            .get(store_type)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown store type: {}", store_type)))?;

        let config_json = serde_json::to_value(config)?;
        factory.create(&config_json).await
    }

    /// Registered store type names, sorted
    pub fn list_stores(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a store type is registered
    pub fn has_store(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }
}
