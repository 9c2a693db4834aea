//! Announcement data model
//!
//! Records are stored as JSON objects of the form
//! `{"id", "title", "content", "attach", "isHide"}` where `isHide` is `0`
//! (visible) or `1` (hidden).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Payload types that can ride along with an announcement
///
/// Anything serde can round-trip qualifies; the default attachment type is
/// `serde_json::Value`.
pub trait Attachment: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Attachment for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Whether end users should see an announcement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

mod hide_flag {
    use super::Visibility;
    use serde::{Deserialize, Deserializer, Serializer};

    const SHOW: u8 = 0;
    const HIDE: u8 = 1;

    pub fn serialize<S: Serializer>(value: &Visibility, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(match value {
            Visibility::Visible => SHOW,
            Visibility::Hidden => HIDE,
        })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Visibility, D::Error> {
        Ok(match u8::deserialize(deserializer)? {
            HIDE => Visibility::Hidden,
            _ => Visibility::Visible,
        })
    }
}

/// One broadcast announcement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement<A = serde_json::Value> {
    /// Time-ordered unique id (UUID v7), assigned at creation
    pub id: Uuid,
    pub title: String,
    pub content: String,
    /// Optional opaque payload (rewards, links, ...)
    pub attach: Option<A>,
    /// Only changed by hiding
    #[serde(rename = "isHide", with = "hide_flag", default)]
    pub visibility: Visibility,
}

impl<A: Attachment> Announcement<A> {
    /// Create a visible announcement with a fresh id
    pub fn new(title: impl Into<String>, content: impl Into<String>, attach: Option<A>) -> Self {
        Self {
            id: Uuid::now_v7(),
            title: title.into(),
            content: content.into(),
            attach,
            visibility: Visibility::Visible,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.visibility == Visibility::Hidden
    }

    /// Serialize to the stored record form
    pub fn to_record(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a stored record
    pub fn from_record(record: &str) -> Result<Self> {
        Ok(serde_json::from_str(record)?)
    }
}

/// Everything in the current version, as returned to callers
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<A = serde_json::Value> {
    /// All announcements, hidden ones included, in insertion order
    pub announcements: Vec<Announcement<A>>,
    /// Client version id, `None` when no version exists
    pub version: Option<String>,
    /// Expiry in epoch seconds, 0 when no version exists
    pub expiry: i64,
}

impl<A> Snapshot<A> {
    /// The empty snapshot reported when no version exists
    pub fn empty() -> Self {
        Self {
            announcements: Vec::new(),
            version: None,
            expiry: 0,
        }
    }

    /// Announcements end users should see
    pub fn visible(&self) -> impl Iterator<Item = &Announcement<A>> {
        self.announcements
            .iter()
            .filter(|a| a.visibility == Visibility::Visible)
    }
}

/// An index as received from a caller, before validation
///
/// Lets admin surfaces pass through whatever they were given (a number,
/// text from a form, a JSON value) and get a typed validation error back.
#[derive(Debug, Clone, PartialEq)]
pub enum RawIndex {
    Index(usize),
    Signed(i64),
    Text(String),
    Invalid(String),
}

impl RawIndex {
    /// Validate into a list position
    ///
    /// Does not check the upper bound; that needs the list.
    pub fn resolve(&self) -> Result<usize> {
        match self {
            RawIndex::Index(index) => Ok(*index),
            RawIndex::Signed(index) => signed(*index),
            RawIndex::Text(text) => match text.trim().parse::<i64>() {
                Ok(index) => signed(index),
                Err(_) => Err(Error::InvalidIndexType {
                    input: text.clone(),
                }),
            },
            RawIndex::Invalid(input) => Err(Error::InvalidIndexType {
                input: input.clone(),
            }),
        }
    }
}

fn signed(index: i64) -> Result<usize> {
    if index < 0 {
        return Err(Error::NegativeIndex { index });
    }
    usize::try_from(index).map_err(|_| Error::InvalidIndexType {
        input: index.to_string(),
    })
}

impl From<usize> for RawIndex {
    fn from(index: usize) -> Self {
        RawIndex::Index(index)
    }
}

impl From<u32> for RawIndex {
    fn from(index: u32) -> Self {
        RawIndex::Signed(i64::from(index))
    }
}

impl From<i64> for RawIndex {
    fn from(index: i64) -> Self {
        RawIndex::Signed(index)
    }
}

impl From<i32> for RawIndex {
    fn from(index: i32) -> Self {
        RawIndex::Signed(i64::from(index))
    }
}

impl From<&str> for RawIndex {
    fn from(text: &str) -> Self {
        RawIndex::Text(text.to_string())
    }
}

impl From<String> for RawIndex {
    fn from(text: String) -> Self {
        RawIndex::Text(text)
    }
}

impl From<&serde_json::Value> for RawIndex {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(index) => RawIndex::Signed(index),
                None => RawIndex::Invalid(n.to_string()),
            },
            serde_json::Value::String(text) => RawIndex::Text(text.clone()),
            other => RawIndex::Invalid(other.to_string()),
        }
    }
}

impl From<serde_json::Value> for RawIndex {
    fn from(value: serde_json::Value) -> Self {
        RawIndex::from(&value)
    }
}
