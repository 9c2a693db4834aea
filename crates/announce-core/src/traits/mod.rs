//! Core traits for the announcement store
//!
//! - [`KvStore`]: The external key-value store announcements live in
//! - [`KvStoreFactory`]: Builds stores from configuration
//! - [`Clock`]: Source of wall-clock time for version ids and expiry

pub mod clock;
pub mod kv_store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use kv_store::{Command, Guard, KvStore, KvStoreFactory, Transaction};
