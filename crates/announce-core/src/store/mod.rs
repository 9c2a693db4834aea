// # Store Implementations
//
// This module provides the in-process implementation of the KvStore trait.
// Networked backends live in their own crates (see `announce-store-redis`).

pub mod memory;

pub use memory::{MemoryKvStore, MemoryKvStoreFactory, Value};
