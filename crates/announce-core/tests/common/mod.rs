//! Test doubles and common utilities for contract tests
//!
//! `WatchedStore` wraps the in-memory store, counting calls and failing on
//! demand so tests can observe what an operation touched. It can also slip
//! another writer's transaction in right after a list read, to replay a
//! race deterministically.

#![allow(dead_code)]

use announce_core::error::{Error, Result};
use announce_core::traits::{KvStore, ManualClock, Transaction};
use announce_core::{AnnouncementConfig, AnnouncementEvent, AnnouncementService, MemoryKvStore};
use chrono::TimeZone;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Store wrapper that counts calls and can inject failures
#[derive(Clone, Default)]
pub struct WatchedStore {
    inner: MemoryKvStore,
    calls: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
    fail_exec: Arc<AtomicBool>,
    fail_all: Arc<AtomicBool>,
    after_read: Arc<Mutex<Option<Transaction>>>,
}

impl WatchedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped store, for direct inspection
    pub fn memory(&self) -> &MemoryKvStore {
        &self.inner
    }

    /// Total store calls made
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Mutating calls that were let through (set/rpush/lset/del/exec)
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every transaction fail with a store error
    pub fn fail_exec(&self, fail: bool) {
        self.fail_exec.store(fail, Ordering::SeqCst);
    }

    /// Make every call fail with a store error
    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Commit `txn` straight after the next `lrange_all` returns
    ///
    /// The caller has already seen the list as it was before `txn`.
    pub fn after_next_read(&self, txn: Transaction) {
        *self.after_read.lock().unwrap() = Some(txn);
    }

    fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(Error::store("injected failure"));
        }
        Ok(())
    }

    fn enter_write(&self) -> Result<()> {
        self.enter()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait::async_trait]
impl KvStore for WatchedStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.enter()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.enter_write()?;
        self.inner.set(key, value).await
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<usize> {
        self.enter_write()?;
        self.inner.rpush(key, value).await
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        self.enter()?;
        self.inner.llen(key).await
    }

    async fn lrange_all(&self, key: &str) -> Result<Vec<String>> {
        self.enter()?;
        let records = self.inner.lrange_all(key).await?;
        let interleaved = self.after_read.lock().unwrap().take();
        if let Some(txn) = interleaved {
            assert!(self.inner.exec(&txn).await?, "interleaved write was refused");
        }
        Ok(records)
    }

    async fn lset(&self, key: &str, index: usize, value: &str) -> Result<()> {
        self.enter_write()?;
        self.inner.lset(key, index, value).await
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.enter_write()?;
        self.inner.del(key).await
    }

    async fn exec(&self, txn: &Transaction) -> Result<bool> {
        self.enter()?;
        if self.fail_exec.load(Ordering::SeqCst) {
            return Err(Error::store("EXECABORT injected"));
        }
        let committed = self.inner.exec(txn).await?;
        if committed {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(committed)
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

/// Default configuration with a small capacity
pub fn minimal_config(capacity: usize) -> AnnouncementConfig {
    AnnouncementConfig::default().with_capacity(capacity)
}

/// 2026-10-16 08:00:00 UTC
pub fn morning() -> ManualClock {
    ManualClock::new(chrono::Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 0).unwrap())
}

/// Service over `store` with a manual clock
pub fn service_with(
    store: &WatchedStore,
    config: AnnouncementConfig,
    clock: &ManualClock,
) -> (AnnouncementService, mpsc::Receiver<AnnouncementEvent>) {
    AnnouncementService::with_clock(Arc::new(store.clone()), config, Arc::new(clock.clone()))
        .expect("valid config")
}

/// Drain every event currently queued
pub fn drain(rx: &mut mpsc::Receiver<AnnouncementEvent>) -> Vec<AnnouncementEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
