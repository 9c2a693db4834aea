//! Expiry timer for the current version
//!
//! The scheduler owns at most one pending timer task. Arming replaces
//! (and aborts) whatever was pending; cancelling aborts it. It knows
//! nothing about versions beyond the deadline it was armed for: what
//! happens when the timer fires is decided by the future handed to
//! [`RotationScheduler::arm`].
//!
//! ## Self-replacement
//!
//! A firing timer usually rotates the version, and rotating re-arms the
//! scheduler. Each arming gets a generation number; the firing task calls
//! [`RotationScheduler::release`] with its generation first, which detaches
//! its own handle so the re-arm does not abort the task that caused it.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Boxed timer body
pub type TimerTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// What the pending timer is waiting for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deadline {
    /// Store key of the version the timer was armed for
    pub version_key: String,
    /// Expiry the timer was armed for, epoch seconds
    pub expiry: i64,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
    deadline: Option<Deadline>,
}

/// Single-slot timer owned by a version registry
#[derive(Default)]
pub struct RotationScheduler {
    slot: Mutex<Slot>,
}

impl std::fmt::Debug for RotationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.lock();
        f.debug_struct("RotationScheduler")
            .field("generation", &slot.generation)
            .field("armed", &slot.handle.is_some())
            .field("deadline", &slot.deadline)
            .finish()
    }
}

impl RotationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arm the timer, replacing any pending one
    ///
    /// `task` receives the generation of this arming and runs after `delay`.
    /// Outside a tokio runtime nothing is scheduled and `false` is returned.
    pub fn arm<F>(&self, delay: Duration, deadline: Deadline, task: F) -> bool
    where
        F: FnOnce(u64) -> TimerTask,
    {
        self.arm_when(delay, deadline, task, |_| true)
    }

    /// Arm the timer unless the pending one waits for a later expiry
    pub fn arm_unless_superseded<F>(&self, delay: Duration, deadline: Deadline, task: F) -> bool
    where
        F: FnOnce(u64) -> TimerTask,
    {
        let expiry = deadline.expiry;
        self.arm_when(delay, deadline, task, |pending| {
            pending.map_or(true, |p| p.expiry <= expiry)
        })
    }

    fn arm_when<F, P>(&self, delay: Duration, deadline: Deadline, task: F, replace: P) -> bool
    where
        F: FnOnce(u64) -> TimerTask,
        P: FnOnce(Option<&Deadline>) -> bool,
    {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No tokio runtime available, expiry timer not armed");
                return false;
            }
        };

        let mut slot = self.lock();
        if slot.handle.is_some() && !replace(slot.deadline.as_ref()) {
            return false;
        }
        slot.generation += 1;
        let body = task(slot.generation);
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            body.await;
        });

        debug!(
            "Expiry timer armed for {} in {:?} (generation {})",
            deadline.version_key, delay, slot.generation
        );
        if let Some(previous) = slot.handle.replace(handle) {
            previous.abort();
        }
        slot.deadline = Some(deadline);
        true
    }

    /// Detach the handle of a timer that has fired
    ///
    /// Returns `false` if the timer was replaced or cancelled meanwhile, in
    /// which case the caller should do nothing.
    pub fn release(&self, generation: u64) -> bool {
        let mut slot = self.lock();
        if slot.generation != generation || slot.handle.is_none() {
            return false;
        }
        slot.handle = None;
        slot.deadline = None;
        true
    }

    /// Abort the pending timer, if any
    pub fn cancel(&self) {
        let mut slot = self.lock();
        slot.generation += 1;
        slot.deadline = None;
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }
    }

    /// Whether a timer is pending
    pub fn is_armed(&self) -> bool {
        self.lock().handle.is_some()
    }

    /// Deadline of the pending timer
    pub fn deadline(&self) -> Option<Deadline> {
        self.lock().deadline.clone()
    }
}

impl Drop for RotationScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
