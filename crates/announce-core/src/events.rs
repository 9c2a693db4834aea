//! Events emitted by the announcement service
//!
//! Events are delivered on a bounded channel returned from
//! [`crate::AnnouncementService::new`]. Emitting never blocks: when the
//! channel is full the event is dropped and a warning is logged.

use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Why a version was replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationReason {
    /// No version existed and an announcement was added
    Created,
    /// `change_version` was called
    Manual,
    /// `delete_all` was called
    DeleteAll,
    /// The last visible announcement was hidden
    AllHidden,
    /// The version's expiry passed
    Expired,
}

impl std::fmt::Display for RotationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RotationReason::Created => "created",
            RotationReason::Manual => "manual",
            RotationReason::DeleteAll => "delete-all",
            RotationReason::AllHidden => "all-hidden",
            RotationReason::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// Announcement service events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnouncementEvent {
    /// A new version became current
    VersionRotated {
        /// Client id of the superseded version, if any
        previous: Option<String>,
        /// Client id of the new version
        current: String,
        /// Expiry of the new version, epoch seconds
        expiry: i64,
        reason: RotationReason,
    },

    /// An announcement was appended
    AnnouncementAdded { id: Uuid, version: String },

    /// An announcement was hidden in place
    AnnouncementHidden { index: usize, version: String },

    /// The expiry timer fired for a version that is no longer current
    ExpiryRotationSkipped {
        /// Client id the timer was armed for
        target: String,
        /// Client id found current when it fired
        current: Option<String>,
    },

    /// The service was stopped
    Stopped,
}

/// Non-blocking sender half of the event channel
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<AnnouncementEvent>,
}

impl EventSink {
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<AnnouncementEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Emit an event
    pub(crate) fn emit(&self, event: AnnouncementEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    "Event channel full, dropping event {:?}. Consider increasing event_channel_capacity.",
                    event
                );
            }
            // Nobody is listening; that's allowed.
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
