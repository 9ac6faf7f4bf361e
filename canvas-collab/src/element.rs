//! Scene elements as seen by the sync layer.
//!
//! Only the fields that take part in merging are modelled. Geometry, style and
//! everything else an editing surface attaches to an element travel in
//! [`Element::payload`] untouched.

use std::borrow::Borrow;

use serde::{Deserialize, Serialize};

use crate::fractional::OrderKey;

/// Globally unique, immutable element identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    /// Create an element ID from any string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ElementId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ElementId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for ElementId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A canvas element annotated with its merge metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    /// Unique identifier.
    pub id: ElementId,
    /// Incremented by the owning mutator on every logical change.
    pub version: u64,
    /// Regenerated on every mutation; breaks ties between equal versions.
    pub version_nonce: u32,
    /// Position in the scene order, absent until the element is placed.
    #[serde(default)]
    pub index: Option<OrderKey>,
    /// Tombstone flag. Deleted elements stay in the collection.
    #[serde(default)]
    pub is_deleted: bool,
    /// Everything else, passed through unchanged.
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl Element {
    /// Create a fresh, unplaced element at version 1.
    #[must_use]
    pub fn new(id: impl Into<ElementId>) -> Self {
        Self {
            id: id.into(),
            version: 1,
            version_nonce: rand::random(),
            index: None,
            is_deleted: false,
            payload: serde_json::Map::new(),
        }
    }

    /// Set the order key.
    #[must_use]
    pub fn with_index(mut self, index: OrderKey) -> Self {
        self.index = Some(index);
        self
    }

    /// Set an explicit version and nonce.
    #[must_use]
    pub fn with_version(mut self, version: u64, version_nonce: u32) -> Self {
        self.version = version;
        self.version_nonce = version_nonce;
        self
    }

    /// Attach a payload field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Record a logical change: bump the version and draw a new nonce.
    pub fn bump_version(&mut self) {
        self.version = self.version.saturating_add(1);
        self.version_nonce = rand::random();
    }

    /// Mark the element deleted. The change is versioned like any other.
    pub fn tombstone(&mut self) {
        self.is_deleted = true;
        self.bump_version();
    }

    /// The order key, if present and well formed.
    #[must_use]
    pub fn valid_index(&self) -> Option<&OrderKey> {
        self.index.as_ref().filter(|key| key.is_valid())
    }

    /// Whether the element should be rendered.
    #[must_use]
    pub const fn is_visible(&self) -> bool {
        !self.is_deleted
    }
}
