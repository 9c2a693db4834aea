//! Version registry
//!
//! The registry owns the single "current version" pointer and its expiry,
//! and is the only component that changes which version is current.
//!
//! ## Rotation
//!
//! ```text
//!   read registry ──► compute next key + expiry
//!         │
//!         ▼
//!   EXEC [guard registry == value read] [extra guards]
//!        DEL old list, DEL new list, SET registry
//!         │
//!    committed? ── no ──► re-read and try again (bounded)
//!         │
//!        yes ──► emit VersionRotated, re-arm expiry timer
//! ```
//!
//! The old list and the registry pointer change in one transaction, so no
//! observer ever sees the pointer without its list being the fresh one,
//! or the old list gone while the pointer still names it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{AnnouncementConfig, ExpiryRotation};
use crate::error::{Error, Result};
use crate::events::{AnnouncementEvent, EventSink, RotationReason};
use crate::scheduler::{Deadline, RotationScheduler, TimerTask};
use crate::traits::{Clock, Guard, KvStore, Transaction};
use crate::version::{KeyLayout, RegistryEntry};

struct RegistryInner {
    store: Arc<dyn KvStore>,
    layout: KeyLayout,
    expire_seconds: u64,
    expiry_rotation: ExpiryRotation,
    retry_delay: Duration,
    max_attempts: usize,
    clock: Arc<dyn Clock>,
    events: EventSink,
    scheduler: RotationScheduler,
    stopped: AtomicBool,
}

/// Owner of the current-version pointer
///
/// Cheap to clone; clones share the same timer and state.
#[derive(Clone)]
pub struct VersionRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for VersionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionRegistry")
            .field("layout", &self.inner.layout)
            .field("expire_seconds", &self.inner.expire_seconds)
            .field("expiry_rotation", &self.inner.expiry_rotation)
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}

impl VersionRegistry {
    pub(crate) fn new(
        store: Arc<dyn KvStore>,
        config: &AnnouncementConfig,
        clock: Arc<dyn Clock>,
        events: EventSink,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                store,
                layout: KeyLayout::new(config.key_prefix.clone(), config.registry_key.clone()),
                expire_seconds: config.expire_seconds,
                expiry_rotation: config.expiry_rotation,
                retry_delay: Duration::from_secs(config.retry_delay_secs),
                max_attempts: config.max_attempts,
                clock,
                events,
                scheduler: RotationScheduler::new(),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Key naming rules in use
    pub fn layout(&self) -> &KeyLayout {
        &self.inner.layout
    }

    pub(crate) fn store(&self) -> &Arc<dyn KvStore> {
        &self.inner.store
    }

    pub(crate) fn events(&self) -> &EventSink {
        &self.inner.events
    }

    pub(crate) fn max_attempts(&self) -> usize {
        self.inner.max_attempts
    }

    /// Fail with [`Error::Stopped`] once shut down
    pub(crate) fn ensure_running(&self) -> Result<()> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(Error::Stopped);
        }
        Ok(())
    }

    /// Read the registry entry
    ///
    /// # Returns
    ///
    /// - `Ok(Some(entry))`: A version is current
    /// - `Ok(None)`: No version exists
    /// - `Err(Error)`: Store failure or corrupt entry
    pub async fn get(&self) -> Result<Option<RegistryEntry>> {
        self.ensure_running()?;
        let raw = self.inner.store.get(&self.inner.layout.registry_key).await?;
        raw.map(|raw| self.inner.layout.parse_entry(&raw))
            .transpose()
    }

    /// The current version, creating the first one if none exists
    pub async fn current_or_create(&self) -> Result<RegistryEntry> {
        for attempt in 1..=self.inner.max_attempts {
            if let Some(entry) = self.get().await? {
                return Ok(entry);
            }
            if let Some(entry) = self
                .rotate_from(None, Vec::new(), RotationReason::Created)
                .await?
            {
                return Ok(entry);
            }
            debug!("Lost the race to create the first version (attempt {})", attempt);
        }
        Err(self.contended("create version"))
    }

    /// Replace the current version with a new, empty one
    ///
    /// Retries while concurrent writers keep changing the registry.
    pub async fn rotate(&self, reason: RotationReason) -> Result<RegistryEntry> {
        for attempt in 1..=self.inner.max_attempts {
            let current = self.get().await?;
            if let Some(entry) = self.rotate_from(current.as_ref(), Vec::new(), reason).await? {
                return Ok(entry);
            }
            debug!("Rotation conflicted (attempt {}), retrying", attempt);
            tokio::task::yield_now().await;
        }
        Err(self.contended("rotate"))
    }

    /// Rotate away from `expected`, provided it is still current
    ///
    /// `expected = None` means "only if no version exists". `guards` are
    /// evaluated in the same transaction.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(entry))`: Rotation committed; `entry` is now current
    /// - `Ok(None)`: A guard failed; nothing changed
    /// - `Err(Error)`: Store failure; nothing changed
    pub async fn rotate_from(
        &self,
        expected: Option<&RegistryEntry>,
        guards: Vec<Guard>,
        reason: RotationReason,
    ) -> Result<Option<RegistryEntry>> {
        self.ensure_running()?;
        let inner = &self.inner;
        let layout = &inner.layout;

        let now = inner.clock.now();
        let version_key =
            layout.next_version_key(expected.map(|e| e.version_key.as_str()), now);
        let expiry = i64::try_from(inner.expire_seconds)
            .ok()
            .and_then(|ttl| now.timestamp().checked_add(ttl))
            .ok_or_else(|| {
                Error::config(format!(
                    "expire_seconds {} overflows the expiry timestamp",
                    inner.expire_seconds
                ))
            })?;
        let raw = KeyLayout::format_entry(&version_key, expiry);

        let mut txn = Transaction::new()
            .guard_value(layout.registry_key.as_str(), expected.map(|e| e.raw.as_str()));
        for guard in guards {
            txn = txn.with_guard(guard);
        }
        if let Some(old) = expected {
            txn = txn.del(old.version_key.as_str());
        }
        txn = txn
            .del(version_key.as_str())
            .set(layout.registry_key.as_str(), raw.as_str());

        if !inner.store.exec(&txn).await? {
            return Ok(None);
        }

        let entry = RegistryEntry {
            client_version: layout.client_version(&version_key),
            version_key,
            expiry,
            raw,
        };

        info!(
            "Version rotated ({}): {} -> {} (expires at {})",
            reason,
            expected.map(|e| e.client_version.as_str()).unwrap_or("none"),
            entry.client_version,
            entry.expiry
        );
        inner.events.emit(AnnouncementEvent::VersionRotated {
            previous: expected.map(|e| e.client_version.clone()),
            current: entry.client_version.clone(),
            expiry: entry.expiry,
            reason,
        });
        self.arm_committed(&entry);

        Ok(Some(entry))
    }

    /// Arm the expiry timer from the stored entry, if any
    pub async fn start(&self) -> Result<Option<RegistryEntry>> {
        let current = self.get().await?;
        match &current {
            Some(entry) => {
                info!(
                    "Current version {} expires at {}",
                    entry.client_version, entry.expiry
                );
                self.arm(entry);
            }
            None => info!("No current version yet"),
        }
        Ok(current)
    }

    /// Cancel the timer and refuse further operations
    ///
    /// Returns `false` if already stopped.
    pub(crate) fn shutdown(&self) -> bool {
        let was_running = !self.inner.stopped.swap(true, Ordering::SeqCst);
        self.inner.scheduler.cancel();
        was_running
    }

    /// Deadline of the pending expiry timer
    pub fn pending_expiry(&self) -> Option<Deadline> {
        self.inner.scheduler.deadline()
    }

    fn contended(&self, operation: &'static str) -> Error {
        warn!(
            "{} gave up after {} conflicting attempts",
            operation, self.inner.max_attempts
        );
        Error::Contended {
            operation,
            attempts: self.inner.max_attempts,
        }
    }

    /// Arm the expiry timer for `entry`
    fn arm(&self, entry: &RegistryEntry) {
        let now = self.inner.clock.now_secs();
        let delay = Duration::from_secs(entry.expiry.saturating_sub(now).max(0) as u64);
        self.arm_after(delay, entry);
    }

    fn arm_after(&self, delay: Duration, entry: &RegistryEntry) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let target = entry.clone();
        self.inner.scheduler.arm(
            delay,
            Self::deadline_of(entry),
            move |generation| expiry_task(weak, target, generation),
        );
    }

    /// Arm for a version this instance just rotated to
    ///
    /// Two rotations in this process may finish out of order; the one with
    /// the earlier expiry never replaces a later pending deadline.
    fn arm_committed(&self, entry: &RegistryEntry) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return;
        }
        let now = self.inner.clock.now_secs();
        let delay = Duration::from_secs(entry.expiry.saturating_sub(now).max(0) as u64);
        let weak = Arc::downgrade(&self.inner);
        let target = entry.clone();
        let armed = self.inner.scheduler.arm_unless_superseded(
            delay,
            Self::deadline_of(entry),
            move |generation| expiry_task(weak, target, generation),
        );
        if !armed {
            debug!(
                "Pending expiry timer outlives {}, left in place",
                entry.client_version
            );
        }
    }

    fn deadline_of(entry: &RegistryEntry) -> Deadline {
        Deadline {
            version_key: entry.version_key.clone(),
            expiry: entry.expiry,
        }
    }

    /// Timer body: the expiry of `target` has been reached
    async fn on_expiry(&self, target: RegistryEntry, generation: u64) {
        if !self.inner.scheduler.release(generation) {
            return;
        }
        if self.ensure_running().is_err() {
            return;
        }

        let outcome = match self.inner.expiry_rotation {
            ExpiryRotation::Unconditional => {
                self.rotate(RotationReason::Expired).await.map(|_| ())
            }
            ExpiryRotation::IfUnchanged => self.rotate_if_current(&target).await,
        };

        if let Err(e) = outcome {
            if matches!(e, Error::Stopped) {
                return;
            }
            error!(
                "Expiry rotation of {} failed: {}. Retrying in {:?}",
                target.client_version, e, self.inner.retry_delay
            );
            self.arm_after(self.inner.retry_delay, &target);
        }
    }

    /// Rotate on expiry only if `target` is still the current version
    async fn rotate_if_current(&self, target: &RegistryEntry) -> Result<()> {
        let current = self.get().await?;
        match current {
            Some(current) if current.raw == target.raw => {
                if current.expiry > self.inner.clock.now_secs() {
                    debug!(
                        "Expiry timer for {} fired early, re-arming",
                        current.client_version
                    );
                    self.arm(&current);
                    return Ok(());
                }
                let rotated = self
                    .rotate_from(Some(&current), Vec::new(), RotationReason::Expired)
                    .await?;
                if rotated.is_none() {
                    let now_current = self.get().await?;
                    self.skip_expiry(target, now_current);
                }
                Ok(())
            }
            other => {
                self.skip_expiry(target, other);
                Ok(())
            }
        }
    }

    fn skip_expiry(&self, target: &RegistryEntry, current: Option<RegistryEntry>) {
        info!(
            "Skipping expiry rotation of {}: current version is {}",
            target.client_version,
            current
                .as_ref()
                .map(|c| c.client_version.as_str())
                .unwrap_or("none")
        );
        self.inner
            .events
            .emit(AnnouncementEvent::ExpiryRotationSkipped {
                target: target.client_version.clone(),
                current: current.as_ref().map(|c| c.client_version.clone()),
            });
        if let Some(current) = current {
            self.arm(&current);
        }
    }
}

/// Boxed timer body holding only a weak reference to the registry
fn expiry_task(registry: Weak<RegistryInner>, target: RegistryEntry, generation: u64) -> TimerTask {
    Box::pin(async move {
        let Some(inner) = registry.upgrade() else {
            return;
        };
        VersionRegistry { inner }.on_expiry(target, generation).await;
    })
}
