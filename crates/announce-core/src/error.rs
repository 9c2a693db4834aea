//! Error types for the announcement store
//!
//! This module defines the closed set of errors returned by every public
//! operation. Callers branch on [`Error::kind`] rather than on message text.

use thiserror::Error;

/// Result type alias for announcement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the announcement store
#[derive(Error, Debug)]
pub enum Error {
    /// Index could not be read as a non-negative integer
    #[error("index must be an integer, got {input:?}")]
    InvalidIndexType {
        /// The offending input, as received
        input: String,
    },

    /// Index was negative
    #[error("index can not be lower than 0, got {index}")]
    NegativeIndex {
        /// The offending index
        index: i64,
    },

    /// Index beyond the current version's list
    #[error("can not find announcement at index {index} (version holds {len})")]
    IndexNotFound {
        /// Requested index
        index: usize,
        /// Length of the list when the lookup was made
        len: usize,
    },

    /// The current version already holds `capacity` announcements
    #[error("announcement count can not exceed {capacity}")]
    CapacityExceeded {
        /// Configured capacity
        capacity: usize,
    },

    /// Underlying store failure, message passed through verbatim
    #[error("Store error: {0}")]
    Store(String),

    /// Optimistic transaction kept losing to concurrent writers
    #[error("{operation} gave up after {attempts} conflicting attempts")]
    Contended {
        /// Operation that was retried
        operation: &'static str,
        /// Attempts made before giving up
        attempts: usize,
    },

    /// Persisted data does not have the expected layout
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    /// Announcement record (de)serialization errors
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation attempted after `stop()`
    #[error("announcement service is stopped")]
    Stopped,

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Coarse error categories callers can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed caller input, rejected before touching the store
    InputValidation,
    /// Index beyond the current list
    NotFound,
    /// Version is full
    CapacityExceeded,
    /// Store failed or could not commit; retry the whole operation
    StoreFailure,
    /// Corrupt data, bad configuration or misuse
    Internal,
}

impl Error {
    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a corrupt-data error
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidIndexType { .. } | Error::NegativeIndex { .. } => {
                ErrorKind::InputValidation
            }
            Error::IndexNotFound { .. } => ErrorKind::NotFound,
            Error::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Error::Store(_) | Error::Contended { .. } => ErrorKind::StoreFailure,
            Error::Corrupt(_)
            | Error::Codec(_)
            | Error::Config(_)
            | Error::Stopped
            | Error::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the whole operation may succeed
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::StoreFailure
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
