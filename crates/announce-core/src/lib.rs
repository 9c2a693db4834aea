// # announce-core
//
// Core library for the versioned broadcast announcement store.
//
// ## Architecture Overview
//
// Announcements are published in batches called versions. Exactly zero or
// one version is current; clients compare the version id they last saw
// with the current one to know whether to refetch.
//
// - **KvStore**: Trait for the shared key-value store (lists, scalars,
//   guarded atomic transactions)
// - **VersionRegistry**: Owns the current-version pointer and rotates it
// - **RotationScheduler**: Single-slot expiry timer owned by the registry
// - **AnnouncementList**: Capacity-bounded list of the current version
// - **AnnouncementService**: Façade composing the above
// - **StoreRegistry**: Plugin-based registry for store backends
//
// ## Design Principles
//
// 1. **Atomic rotation**: The old list and the registry pointer change in
//    one transaction
// 2. **Optimistic writers**: Appends and hides commit guarded on what they
//    read, and retry on conflict
// 3. **Library-First**: The daemon is a thin host around the service
// 4. **Plugin-Based**: Store backends are registered, not hard-coded

pub mod backends;
pub mod config;
pub mod error;
pub mod events;
pub mod list;
pub mod model;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod traits;
pub mod version;

// Re-export core types for convenience
pub use backends::StoreRegistry;
pub use config::{
    AnnouncementConfig, ExpiryRotation, StoreConfig, MAX_CAPACITY, MAX_EXPIRE_SECONDS,
    MAX_RETRY_DELAY_SECS,
};
pub use error::{Error, ErrorKind, Result};
pub use events::{AnnouncementEvent, RotationReason};
pub use list::{AnnouncementList, HideOutcome};
pub use model::{Announcement, Attachment, RawIndex, Snapshot, Visibility};
pub use scheduler::{Deadline, RotationScheduler};
pub use service::AnnouncementService;
pub use store::MemoryKvStore;
pub use traits::{Clock, KvStore, KvStoreFactory, ManualClock, SystemClock, Transaction};
pub use version::{KeyLayout, RegistryEntry, VersionRegistry};
