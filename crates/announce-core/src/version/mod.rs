// # Versions
//
// A version is a named, capacity-bounded, time-limited batch of
// announcements. Exactly zero or one version is current.
//
// ## Persisted Layout
//
// ```text
// V:AND:E               -> "ANNOUNCE:20261016_2,1761177600"   (registry entry)
// ANNOUNCE:20261016_2   -> [record, record, ...]              (version list)
// ```
//
// The version key is `<prefix><dateSign>_<sequence>`. Rotating twice on
// the same UTC day bumps the sequence; the first rotation of a new day
// starts again at 1. Clients only ever see the key with the prefix
// stripped (`20261016_2`).

pub mod registry;

pub use registry::VersionRegistry;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::{Error, Result};

/// Format of the date part of a version key
const DATE_SIGN_FORMAT: &str = "%Y%m%d";

/// The registry entry: which version is current and when it expires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    /// Full store key of the version's list
    pub version_key: String,
    /// Version id safe to hand to clients
    pub client_version: String,
    /// Expiry, epoch seconds
    pub expiry: i64,
    /// The registry value exactly as stored, used to guard transactions
    pub raw: String,
}

/// Naming rules for registry and version keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    pub key_prefix: String,
    pub registry_key: String,
}

impl KeyLayout {
    pub fn new(key_prefix: impl Into<String>, registry_key: impl Into<String>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            registry_key: registry_key.into(),
        }
    }

    /// Calendar-day part of a version key
    pub fn date_sign(now: DateTime<Utc>) -> String {
        now.format(DATE_SIGN_FORMAT).to_string()
    }

    /// Build a version key
    pub fn version_key(&self, date_sign: &str, sequence: u64) -> String {
        format!("{}{}_{}", self.key_prefix, date_sign, sequence)
    }

    /// Split a version key into date sign and sequence
    pub fn parse_version_key<'a>(&self, version_key: &'a str) -> Option<(&'a str, u64)> {
        let rest = version_key.strip_prefix(self.key_prefix.as_str())?;
        let (date_sign, sequence) = rest.rsplit_once('_')?;
        Some((date_sign, sequence.parse().ok()?))
    }

    /// Key of the version that supersedes `previous`
    ///
    /// Same day as `previous`: sequence + 1. Otherwise 1.
    pub fn next_version_key(&self, previous: Option<&str>, now: DateTime<Utc>) -> String {
        let today = Self::date_sign(now);
        let sequence = match previous.map(|key| (key, self.parse_version_key(key))) {
            Some((_, Some((date_sign, sequence)))) if date_sign == today => sequence + 1,
            Some((key, None)) => {
                warn!("Unrecognised version key '{}', restarting sequence at 1", key);
                1
            }
            _ => 1,
        };
        self.version_key(&today, sequence)
    }

    /// Version id as shown to clients: the key without the store prefix
    pub fn client_version(&self, version_key: &str) -> String {
        match version_key.strip_prefix(self.key_prefix.as_str()) {
            Some(client) => client.to_string(),
            None => {
                warn!(
                    "Version key '{}' lacks prefix '{}'",
                    version_key, self.key_prefix
                );
                version_key.to_string()
            }
        }
    }

    /// Encode a registry value
    pub fn format_entry(version_key: &str, expiry: i64) -> String {
        format!("{},{}", version_key, expiry)
    }

    /// Decode a registry value
    pub fn parse_entry(&self, raw: &str) -> Result<RegistryEntry> {
        let (version_key, expiry) = raw.rsplit_once(',').ok_or_else(|| {
            Error::corrupt(format!(
                "registry key '{}' holds '{}', expected '<version>,<expiry>'",
                self.registry_key, raw
            ))
        })?;
        let expiry = expiry.trim().parse::<i64>().map_err(|_| {
            Error::corrupt(format!(
                "registry key '{}' holds non-numeric expiry '{}'",
                self.registry_key, expiry
            ))
        })?;
        if version_key.is_empty() {
            return Err(Error::corrupt(format!(
                "registry key '{}' holds an empty version",
                self.registry_key
            )));
        }

        Ok(RegistryEntry {
            version_key: version_key.to_string(),
            client_version: self.client_version(version_key),
            expiry,
            raw: raw.to_string(),
        })
    }
}
