//! Announcement service
//!
//! The façade callers use: add, list, hide, inspect, and force-rotate.
//!
//! ## Architecture
//!
//! ```text
//!                   ┌─────────────────────┐
//!   callers ───────►│ AnnouncementService │─────► events (mpsc)
//!                   └─────────────────────┘
//!                        │            │
//!                        ▼            ▼
//!            ┌──────────────────┐  ┌─────────────────┐
//!            │ AnnouncementList │─►│ VersionRegistry │──► RotationScheduler
//!            └──────────────────┘  └─────────────────┘      (expiry timer)
//!                        │            │
//!                        ▼            ▼
//!                   ┌─────────────────────┐
//!                   │       KvStore       │
//!                   └─────────────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! 1. `new()` validates the configuration and returns the event receiver
//! 2. `start()` arms the expiry timer from whatever version is stored
//! 3. operations run concurrently from any number of tasks
//! 4. `stop()` cancels the timer, closes the store and refuses further calls

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AnnouncementConfig;
use crate::error::Result;
use crate::events::{AnnouncementEvent, EventSink, RotationReason};
use crate::list::{AnnouncementList, HideOutcome};
use crate::model::{Announcement, Attachment, RawIndex, Snapshot};
use crate::scheduler::Deadline;
use crate::traits::{Clock, KvStore, SystemClock};
use crate::version::VersionRegistry;

/// Versioned broadcast announcement store
pub struct AnnouncementService<A = serde_json::Value> {
    registry: VersionRegistry,
    list: AnnouncementList<A>,
    config: AnnouncementConfig,
}

impl<A> Clone for AnnouncementService<A> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            list: self.list.clone(),
            config: self.config.clone(),
        }
    }
}

impl<A> std::fmt::Debug for AnnouncementService<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnouncementService")
            .field("registry", &self.registry)
            .field("list", &self.list)
            .finish()
    }
}

impl<A: Attachment> AnnouncementService<A> {
    /// Create a new announcement service
    ///
    /// # Parameters
    ///
    /// - `store`: Store implementation shared with any other instances
    /// - `config`: Service configuration (`config.store` is not consulted;
    ///   the store is already built)
    ///
    /// # Returns
    ///
    /// A tuple of (service, event_receiver) where event_receiver yields service events
    pub fn new(
        store: Arc<dyn KvStore>,
        config: AnnouncementConfig,
    ) -> Result<(Self, mpsc::Receiver<AnnouncementEvent>)> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create a service reading time from `clock`
    pub fn with_clock(
        store: Arc<dyn KvStore>,
        config: AnnouncementConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, mpsc::Receiver<AnnouncementEvent>)> {
        config.validate()?;

        let (events, rx) = EventSink::channel(config.event_channel_capacity);
        let registry = VersionRegistry::new(store, &config, clock, events);
        let list = AnnouncementList::new(registry.clone(), config.capacity);

        Ok((
            Self {
                registry,
                list,
                config,
            },
            rx,
        ))
    }

    pub fn config(&self) -> &AnnouncementConfig {
        &self.config
    }

    /// Arm the expiry timer for the stored version, if any
    pub async fn start(&self) -> Result<()> {
        info!(
            "Starting announcement service (capacity {}, ttl {}s, expiry rotation {})",
            self.config.capacity, self.config.expire_seconds, self.config.expiry_rotation
        );
        self.registry.start().await?;
        Ok(())
    }

    /// Cancel the timer and release the store
    ///
    /// Later calls fail with [`crate::Error::Stopped`]. Stopping twice is a no-op.
    pub async fn stop(&self) {
        if !self.registry.shutdown() {
            debug!("Announcement service already stopped");
            return;
        }
        if let Err(e) = self.registry.store().close().await {
            warn!("Failed to close store: {}", e);
        }
        info!("Announcement service stopped");
        self.registry.events().emit(AnnouncementEvent::Stopped);
    }

    /// Publish a new visible announcement
    ///
    /// Creates a version first if none exists.
    pub async fn add_announcement(
        &self,
        title: impl Into<String>,
        content: impl Into<String>,
        attach: Option<A>,
    ) -> Result<Uuid> {
        let announcement = Announcement::new(title, content, attach);
        let entry = self.list.append(&announcement).await?;
        info!(
            "Added announcement {} to version {}",
            announcement.id, entry.client_version
        );
        Ok(announcement.id)
    }

    /// Everything in the current version, hidden announcements included
    pub async fn get_announcement(&self) -> Result<Snapshot<A>> {
        let Some(entry) = self.registry.get().await? else {
            return Ok(Snapshot::empty());
        };
        Ok(Snapshot {
            announcements: self.list.get_all(&entry).await?,
            version: Some(entry.client_version),
            expiry: entry.expiry,
        })
    }

    /// Hide the announcement at `index` of the current version
    ///
    /// Accepts integers, text and JSON values; see [`RawIndex`].
    pub async fn hide_announcement(&self, index: impl Into<RawIndex>) -> Result<()> {
        match self.list.hide_at(index).await? {
            HideOutcome::AlreadyHidden | HideOutcome::Hidden => {}
            HideOutcome::Rotated(entry) => info!(
                "Every announcement hidden, rotated to version {}",
                entry.client_version
            ),
        }
        Ok(())
    }

    /// Client id of the current version
    pub async fn get_version(&self) -> Result<Option<String>> {
        Ok(self.registry.get().await?.map(|e| e.client_version))
    }

    /// Expiry of the current version in epoch seconds, 0 when none exists
    pub async fn get_expire_time(&self) -> Result<i64> {
        Ok(self.registry.get().await?.map_or(0, |e| e.expiry))
    }

    /// Drop every announcement by moving to a fresh version
    pub async fn delete_all(&self) -> Result<String> {
        Ok(self.registry.rotate(RotationReason::DeleteAll).await?.client_version)
    }

    /// Move to a fresh version
    pub async fn change_version(&self) -> Result<String> {
        Ok(self.registry.rotate(RotationReason::Manual).await?.client_version)
    }

    /// What the expiry timer is currently waiting for
    pub fn pending_expiry(&self) -> Option<Deadline> {
        self.registry.pending_expiry()
    }
}
