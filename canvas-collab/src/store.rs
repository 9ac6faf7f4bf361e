//! Authoritative scene storage for the local process.
//!
//! The [`SceneStore`] holds the ordered element collection behind a single
//! `Arc` that is swapped whole on every install. Readers take a
//! [`SceneSnapshot`] and keep it as long as they like; they never observe a
//! half-merged collection.

use std::collections::{HashMap, HashSet};
use std::hash::BuildHasher;
use std::sync::{Arc, PoisonError, RwLock};

use crate::element::{Element, ElementId};
use crate::reconcile::{reconcile_with_report, OrderedElements, ReconcileReport};

/// An immutable view of the scene at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneSnapshot {
    elements: OrderedElements,
    revision: u64,
}

impl SceneSnapshot {
    /// All elements in order, tombstones included.
    #[must_use]
    pub fn elements(&self) -> &OrderedElements {
        &self.elements
    }

    /// Elements that should be rendered, in order.
    pub fn visible_elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter().filter(|e| e.is_visible())
    }

    /// Find an element by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Element> {
        self.elements.get(id)
    }

    /// Number of elements, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the scene is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Sum of all element versions.
    ///
    /// Changes whenever any element changes, so it is a cheap way to decide
    /// whether a redraw or a broadcast is due.
    #[must_use]
    pub fn scene_version(&self) -> u64 {
        self.elements
            .iter()
            .fold(0_u64, |acc, e| acc.wrapping_add(e.version))
    }

    /// How many times the store has installed a new collection.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }
}

/// Shared handle to the local scene.
///
/// Clones share the same underlying scene.
///
/// # Example
///
/// ```
/// use std::collections::HashSet;
/// use canvas_collab::{Element, SceneStore};
///
/// let store = SceneStore::new();
/// let report = store.apply_remote(vec![Element::new("rect-1")], &HashSet::new());
///
/// assert_eq!(report.remote_applied, 1);
/// assert!(store.snapshot().get("rect-1").is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct SceneStore {
    current: Arc<RwLock<Arc<SceneSnapshot>>>,
}

impl SceneStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given elements, sorted and repaired.
    #[must_use]
    pub fn with_elements(elements: Vec<Element>) -> Self {
        let snapshot = SceneSnapshot {
            elements: OrderedElements::from_unordered(elements),
            revision: 0,
        };
        Self {
            current: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    /// The current scene.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SceneSnapshot> {
        let current = self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }

    /// Merge a remote batch into the scene and install the result.
    ///
    /// The write lock is held across the merge so concurrent installs cannot
    /// lose each other's changes.
    #[must_use]
    pub fn apply_remote<S: BuildHasher>(
        &self,
        remote: Vec<Element>,
        active_ids: &HashSet<ElementId, S>,
    ) -> ReconcileReport {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let (elements, report) = reconcile_with_report(&current.elements, remote, active_ids);
        if elements != current.elements {
            *current = Arc::new(SceneSnapshot {
                elements,
                revision: current.revision + 1,
            });
        }
        report
    }

    /// Install the editing surface's collection as the new scene.
    #[must_use]
    pub fn replace_local(&self, elements: Vec<Element>) -> Arc<SceneSnapshot> {
        let elements = OrderedElements::from_unordered(elements);
        let mut current = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let snapshot = Arc::new(SceneSnapshot {
            elements,
            revision: current.revision + 1,
        });
        *current = Arc::clone(&snapshot);
        snapshot
    }
}

/// Tracks which element versions have already been sent to peers.
///
/// Only elements whose version moved past the last broadcast need to go out
/// again.
#[derive(Debug, Clone, Default)]
pub struct BroadcastTracker {
    sent: HashMap<ElementId, u64>,
}

impl BroadcastTracker {
    /// Create an empty tracker; everything is pending.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Elements newer than their last broadcast, in scene order.
    #[must_use]
    pub fn pending(&self, snapshot: &SceneSnapshot) -> Vec<Element> {
        snapshot
            .elements()
            .iter()
            .filter(|e| self.sent.get(&e.id).is_none_or(|&v| e.version > v))
            .cloned()
            .collect()
    }

    /// Record that these elements went out.
    pub fn mark_sent<'a>(&mut self, elements: impl IntoIterator<Item = &'a Element>) {
        for element in elements {
            let entry = self.sent.entry(element.id.clone()).or_insert(0);
            *entry = (*entry).max(element.version);
        }
    }

    /// Forget everything, forcing a full resync on the next broadcast.
    pub fn reset(&mut self) {
        self.sent.clear();
    }

    /// Last version sent for an element.
    #[must_use]
    pub fn sent_version(&self, id: &str) -> Option<u64> {
        self.sent.get(id).copied()
    }
}
