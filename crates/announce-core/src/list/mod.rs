//! The announcement list of the current version
//!
//! Appends and hides are optimistic: they read, decide, then commit a
//! transaction guarded on what they read. A failed guard means another
//! writer got there first, so the operation starts over from fresh reads.

use std::marker::PhantomData;
use tracing::debug;

use crate::error::{Error, Result};
use crate::events::{AnnouncementEvent, RotationReason};
use crate::model::{Announcement, Attachment, RawIndex, Visibility};
use crate::traits::{Guard, Transaction};
use crate::version::{RegistryEntry, VersionRegistry};

/// Result of hiding an announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HideOutcome {
    /// It was hidden already; nothing was written
    AlreadyHidden,
    /// It was hidden in place
    Hidden,
    /// It was the last visible one, so the version was replaced
    Rotated(RegistryEntry),
}

/// Capacity-bounded list of announcements, one per version
pub struct AnnouncementList<A = serde_json::Value> {
    registry: VersionRegistry,
    capacity: usize,
    _attach: PhantomData<fn() -> A>,
}

impl<A> Clone for AnnouncementList<A> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            capacity: self.capacity,
            _attach: PhantomData,
        }
    }
}

impl<A> std::fmt::Debug for AnnouncementList<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnouncementList")
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<A: Attachment> AnnouncementList<A> {
    pub(crate) fn new(registry: VersionRegistry, capacity: usize) -> Self {
        Self {
            registry,
            capacity,
            _attach: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append to the current version, creating one if none exists
    ///
    /// # Returns
    ///
    /// - `Ok(entry)`: Appended to the version described by `entry`
    /// - `Err(Error::CapacityExceeded)`: The current version is full
    /// - `Err(Error)`: Store failure or persistent contention
    pub async fn append(&self, announcement: &Announcement<A>) -> Result<RegistryEntry> {
        let record = announcement.to_record()?;
        let store = self.registry.store();

        for attempt in 1..=self.registry.max_attempts() {
            let entry = self.registry.current_or_create().await?;
            let len = store.llen(&entry.version_key).await?;
            if len >= self.capacity {
                return Err(Error::CapacityExceeded {
                    capacity: self.capacity,
                });
            }

            let txn = Transaction::new()
                .guard_value(self.registry.layout().registry_key.as_str(), Some(entry.raw.as_str()))
                .guard_list_shorter_than(entry.version_key.as_str(), self.capacity)
                .rpush(entry.version_key.as_str(), record.as_str());

            if store.exec(&txn).await? {
                debug!(
                    "Appended announcement {} to {} at position {}",
                    announcement.id, entry.client_version, len
                );
                self.registry.events().emit(AnnouncementEvent::AnnouncementAdded {
                    id: announcement.id,
                    version: entry.client_version.clone(),
                });
                return Ok(entry);
            }
            debug!("Append conflicted (attempt {}), retrying", attempt);
            tokio::task::yield_now().await;
        }

        Err(Error::Contended {
            operation: "append",
            attempts: self.registry.max_attempts(),
        })
    }

    /// Every announcement of `entry`'s version, hidden ones included
    pub async fn get_all(&self, entry: &RegistryEntry) -> Result<Vec<Announcement<A>>> {
        self.registry
            .store()
            .lrange_all(&entry.version_key)
            .await?
            .iter()
            .map(|record| Announcement::from_record(record))
            .collect()
    }

    /// Number of announcements in `entry`'s version
    pub async fn len(&self, entry: &RegistryEntry) -> Result<usize> {
        self.registry.store().llen(&entry.version_key).await
    }

    /// Replace element `index`, provided the version is still current and
    /// the element still reads `expected`
    ///
    /// Returns `Ok(false)` when either condition no longer holds.
    pub async fn set_at(
        &self,
        entry: &RegistryEntry,
        index: usize,
        expected: &str,
        announcement: &Announcement<A>,
    ) -> Result<bool> {
        let txn = Transaction::new()
            .guard_value(self.registry.layout().registry_key.as_str(), Some(entry.raw.as_str()))
            .guard_item(entry.version_key.as_str(), index, expected)
            .lset(entry.version_key.as_str(), index, announcement.to_record()?);
        self.registry.store().exec(&txn).await
    }

    /// Hide the announcement at `index`
    ///
    /// The index is validated before the store is touched. Hiding the last
    /// visible announcement rotates the version instead of writing the
    /// element.
    pub async fn hide_at(&self, index: impl Into<RawIndex>) -> Result<HideOutcome> {
        let index = index.into().resolve()?;
        let store = self.registry.store();

        for attempt in 1..=self.registry.max_attempts() {
            let Some(entry) = self.registry.get().await? else {
                return Err(Error::IndexNotFound { index, len: 0 });
            };

            let records = store.lrange_all(&entry.version_key).await?;
            let Some(raw) = records.get(index) else {
                return Err(Error::IndexNotFound {
                    index,
                    len: records.len(),
                });
            };

            let mut announcements = records
                .iter()
                .map(|record| Announcement::<A>::from_record(record))
                .collect::<Result<Vec<_>>>()?;
            if announcements[index].is_hidden() {
                debug!("Announcement {} already hidden", index);
                return Ok(HideOutcome::AlreadyHidden);
            }
            announcements[index].visibility = Visibility::Hidden;
            let all_hidden = announcements.iter().all(|a| a.is_hidden());

            if all_hidden {
                let guards = vec![
                    Guard::ItemEquals {
                        key: entry.version_key.clone(),
                        index,
                        expected: raw.clone(),
                    },
                    Guard::ListShorterThan {
                        key: entry.version_key.clone(),
                        max: records.len() + 1,
                    },
                ];
                if let Some(rotated) = self
                    .registry
                    .rotate_from(Some(&entry), guards, RotationReason::AllHidden)
                    .await?
                {
                    return Ok(HideOutcome::Rotated(rotated));
                }
            } else if self.set_at(&entry, index, raw, &announcements[index]).await? {
                debug!("Hid announcement {} in {}", index, entry.client_version);
                self.registry
                    .events()
                    .emit(AnnouncementEvent::AnnouncementHidden {
                        index,
                        version: entry.client_version.clone(),
                    });
                return Ok(HideOutcome::Hidden);
            }

            debug!("Hide conflicted (attempt {}), retrying", attempt);
            tokio::task::yield_now().await;
        }

        Err(Error::Contended {
            operation: "hide",
            attempts: self.registry.max_attempts(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnnouncementConfig;
    use crate::events::EventSink;
    use crate::store::MemoryKvStore;
    use crate::traits::{KvStore, SystemClock};
    use std::sync::Arc;

    fn list(store: &MemoryKvStore, capacity: usize) -> AnnouncementList {
        let (events, _rx) = EventSink::channel(64);
        let registry = VersionRegistry::new(
            Arc::new(store.clone()),
            &AnnouncementConfig::default(),
            Arc::new(SystemClock),
            events,
        );
        AnnouncementList::new(registry, capacity)
    }

    fn announcement(title: &str) -> Announcement {
        Announcement::new(title, "body", None)
    }

    #[tokio::test]
    async fn test_append_creates_version_and_keeps_order() {
        let store = MemoryKvStore::new();
        let list = list(&store, 5);

        let entry = list.append(&announcement("a")).await.unwrap();
        list.append(&announcement("b")).await.unwrap();

        let titles: Vec<_> = list
            .get_all(&entry)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.title)
            .collect();
        assert_eq!(titles, ["a", "b"]);
    }

    #[tokio::test]
    async fn test_append_refuses_when_full() {
        let store = MemoryKvStore::new();
        let list = list(&store, 2);

        list.append(&announcement("a")).await.unwrap();
        let entry = list.append(&announcement("b")).await.unwrap();
        let err = list.append(&announcement("c")).await.unwrap_err();

        assert!(matches!(err, Error::CapacityExceeded { capacity: 2 }));
        assert_eq!(list.len(&entry).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_hide_in_place_then_idempotent() {
        let store = MemoryKvStore::new();
        let list = list(&store, 5);
        let entry = list.append(&announcement("a")).await.unwrap();
        list.append(&announcement("b")).await.unwrap();

        assert_eq!(list.hide_at(0usize).await.unwrap(), HideOutcome::Hidden);
        let before = store.lrange_all(&entry.version_key).await.unwrap();

        assert_eq!(list.hide_at(0usize).await.unwrap(), HideOutcome::AlreadyHidden);
        assert_eq!(store.lrange_all(&entry.version_key).await.unwrap(), before);

        let all = list.get_all(&entry).await.unwrap();
        assert!(all[0].is_hidden());
        assert!(!all[1].is_hidden());
    }

    #[tokio::test]
    async fn test_hiding_last_visible_rotates() {
        let store = MemoryKvStore::new();
        let list = list(&store, 5);
        let entry = list.append(&announcement("a")).await.unwrap();

        let outcome = list.hide_at(0usize).await.unwrap();
        let HideOutcome::Rotated(rotated) = outcome else {
            panic!("expected rotation, got {:?}", outcome);
        };
        assert_ne!(rotated.version_key, entry.version_key);
        assert_eq!(list.len(&rotated).await.unwrap(), 0);
        assert_eq!(store.llen(&entry.version_key).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_hide_without_version() {
        let store = MemoryKvStore::new();
        let err = list(&store, 5).hide_at(0usize).await.unwrap_err();
        assert!(matches!(err, Error::IndexNotFound { index: 0, len: 0 }));
    }

    #[tokio::test]
    async fn test_set_at_refuses_stale_expectation() {
        let store = MemoryKvStore::new();
        let list = list(&store, 5);
        let first = announcement("a");
        let entry = list.append(&first).await.unwrap();

        let replacement = announcement("z");
        assert!(!list.set_at(&entry, 0, "stale", &replacement).await.unwrap());
        assert!(
            list.set_at(&entry, 0, &first.to_record().unwrap(), &replacement)
                .await
                .unwrap()
        );
        assert_eq!(list.get_all(&entry).await.unwrap()[0].title, "z");
    }
}
