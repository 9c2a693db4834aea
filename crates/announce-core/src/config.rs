//! Configuration types for the announcement store
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};

/// Largest permitted capacity
///
/// Per-user read/hidden state is kept by callers as a bitmask over list
/// positions, which must fit a 32-bit signed integer.
pub const MAX_CAPACITY: usize = 31;

/// Longest permitted version lifetime (ten years)
pub const MAX_EXPIRE_SECONDS: u64 = 315_576_000;

/// Longest permitted delay before retrying a failed expiry rotation
pub const MAX_RETRY_DELAY_SECS: u64 = 300;

/// Main announcement store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnouncementConfig {
    /// Maximum number of announcements in one version
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Lifetime of a version, in seconds, before it rotates automatically
    #[serde(default = "default_expire_seconds")]
    pub expire_seconds: u64,

    /// Prefix of every version list key; stripped from client version ids
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Key of the scalar holding `"<versionKey>,<expiry>"`
    #[serde(default = "default_registry_key")]
    pub registry_key: String,

    /// What the expiry timer does when it fires
    #[serde(default)]
    pub expiry_rotation: ExpiryRotation,

    /// Delay before re-arming the expiry timer after a failed rotation
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Attempts an optimistic transaction makes before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Capacity of the event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Store backend selection
    #[serde(default)]
    pub store: StoreConfig,
}

impl AnnouncementConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            capacity: default_capacity(),
            expire_seconds: default_expire_seconds(),
            key_prefix: default_key_prefix(),
            registry_key: default_registry_key(),
            expiry_rotation: ExpiryRotation::default(),
            retry_delay_secs: default_retry_delay_secs(),
            max_attempts: default_max_attempts(),
            event_channel_capacity: default_event_channel_capacity(),
            store: StoreConfig::default(),
        }
    }

    /// Set the capacity
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the version lifetime
    pub fn with_expire_seconds(mut self, expire_seconds: u64) -> Self {
        self.expire_seconds = expire_seconds;
        self
    }

    /// Set the expiry timer policy
    pub fn with_expiry_rotation(mut self, expiry_rotation: ExpiryRotation) -> Self {
        self.expiry_rotation = expiry_rotation;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            return Err(crate::Error::config(format!(
                "capacity must be between 1 and {}, got {}",
                MAX_CAPACITY, self.capacity
            )));
        }
        if self.expire_seconds == 0 || self.expire_seconds > MAX_EXPIRE_SECONDS {
            return Err(crate::Error::config(format!(
                "expire_seconds must be between 1 and {}, got {}",
                MAX_EXPIRE_SECONDS, self.expire_seconds
            )));
        }
        if self.key_prefix.is_empty() {
            return Err(crate::Error::config("key_prefix cannot be empty"));
        }
        if self.key_prefix.contains(',') {
            return Err(crate::Error::config("key_prefix cannot contain ','"));
        }
        if self.registry_key.is_empty() {
            return Err(crate::Error::config("registry_key cannot be empty"));
        }
        if self.registry_key.starts_with(&self.key_prefix) {
            return Err(crate::Error::config(format!(
                "registry_key '{}' cannot start with key_prefix '{}'",
                self.registry_key, self.key_prefix
            )));
        }
        if self.retry_delay_secs == 0 || self.retry_delay_secs > MAX_RETRY_DELAY_SECS {
            return Err(crate::Error::config(format!(
                "retry_delay_secs must be between 1 and {}, got {}",
                MAX_RETRY_DELAY_SECS, self.retry_delay_secs
            )));
        }
        if self.max_attempts == 0 {
            return Err(crate::Error::config("max_attempts must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event_channel_capacity must be > 0"));
        }

        self.store.validate()?;

        Ok(())
    }
}

impl Default for AnnouncementConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Behaviour of the expiry timer when it fires
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryRotation {
    /// Rotate only if the version the timer was armed for is still current
    /// and its expiry has passed; otherwise re-arm for whatever is current
    #[default]
    IfUnchanged,

    /// Rotate whatever is current, even if another instance already did
    Unconditional,
}

impl std::fmt::Display for ExpiryRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ExpiryRotation::IfUnchanged => "if_unchanged",
            ExpiryRotation::Unconditional => "unconditional",
        })
    }
}

impl std::str::FromStr for ExpiryRotation {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "if_unchanged" | "if-unchanged" => Ok(ExpiryRotation::IfUnchanged),
            "unconditional" => Ok(ExpiryRotation::Unconditional),
            other => Err(crate::Error::config(format!(
                "unknown expiry rotation '{}' (expected if_unchanged or unconditional)",
                other
            ))),
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// In-memory store (not persistent)
    #[default]
    Memory,

    /// Redis server
    Redis {
        /// Connection URL, e.g. `redis://127.0.0.1:6379`
        url: String,
    },

    /// Custom store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl StoreConfig {
    /// Validate the store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StoreConfig::Memory => Ok(()),
            StoreConfig::Redis { url } => {
                if !url.starts_with("redis://")
                    && !url.starts_with("rediss://")
                    && !url.starts_with("redis+unix://")
                    && !url.starts_with("unix://")
                {
                    return Err(crate::Error::config(format!(
                        "Redis URL must use a redis://, rediss:// or unix:// scheme. Got: {}",
                        url
                    )));
                }
                Ok(())
            }
            StoreConfig::Custom { factory, .. } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom store factory cannot be empty"));
                }
                Ok(())
            }
        }
    }

    /// Get the store type name
    pub fn type_name(&self) -> &str {
        match self {
            StoreConfig::Memory => "memory",
            StoreConfig::Redis { .. } => "redis",
            StoreConfig::Custom { factory, .. } => factory,
        }
    }
}

fn default_capacity() -> usize {
    30
}

fn default_expire_seconds() -> u64 {
    604_800
}

fn default_key_prefix() -> String {
    "ANNOUNCE:".to_string()
}

fn default_registry_key() -> String {
    "V:AND:E".to_string()
}

fn default_retry_delay_secs() -> u64 {
    30
}

fn default_max_attempts() -> usize {
    8
}

fn default_event_channel_capacity() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AnnouncementConfig::default();
        assert_eq!(config.capacity, 30);
        assert_eq!(config.expire_seconds, 604_800);
        assert_eq!(config.expiry_rotation, ExpiryRotation::IfUnchanged);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: AnnouncementConfig =
            serde_json::from_str(r#"{"capacity": 5, "store": {"type": "redis", "url": "redis://localhost"}}"#)
                .unwrap();
        assert_eq!(config.capacity, 5);
        assert_eq!(config.key_prefix, "ANNOUNCE:");
        assert_eq!(config.store.type_name(), "redis");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(AnnouncementConfig::new().with_capacity(0).validate().is_err());
        assert!(AnnouncementConfig::new().with_capacity(32).validate().is_err());
        assert!(AnnouncementConfig::new().with_expire_seconds(0).validate().is_err());

        let mut config = AnnouncementConfig::new();
        config.key_prefix = "A,B:".to_string();
        assert!(config.validate().is_err());

        let mut config = AnnouncementConfig::new();
        config.registry_key = "ANNOUNCE:registry".to_string();
        assert!(config.validate().is_err());

        let mut config = AnnouncementConfig::new();
        config.store = StoreConfig::Redis {
            url: "http://localhost".to_string(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expire_seconds_upper_bound() {
        let config = AnnouncementConfig::new().with_expire_seconds(MAX_EXPIRE_SECONDS);
        assert!(config.validate().is_ok());

        for expire_seconds in [MAX_EXPIRE_SECONDS + 1, i64::MAX as u64 + 1, u64::MAX] {
            let err = AnnouncementConfig::new()
                .with_expire_seconds(expire_seconds)
                .validate()
                .unwrap_err();
            assert!(matches!(err, crate::Error::Config(_)), "{}", expire_seconds);
        }
    }

    #[test]
    fn test_retry_delay_range() {
        let mut config = AnnouncementConfig::new();
        for (retry_delay_secs, valid) in [(0, false), (1, true), (300, true), (301, false)] {
            config.retry_delay_secs = retry_delay_secs;
            assert_eq!(config.validate().is_ok(), valid, "{}", retry_delay_secs);
        }

        let config: AnnouncementConfig = serde_json::from_str(r#"{"retry_delay_secs": 0}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expiry_rotation_from_str() {
        assert_eq!(
            "unconditional".parse::<ExpiryRotation>().unwrap(),
            ExpiryRotation::Unconditional
        );
        assert_eq!(
            "IF_UNCHANGED".parse::<ExpiryRotation>().unwrap(),
            ExpiryRotation::IfUnchanged
        );
        assert!("sometimes".parse::<ExpiryRotation>().is_err());
    }
}
