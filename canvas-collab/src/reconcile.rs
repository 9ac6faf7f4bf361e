//! # Reconciliation
//!
//! Merges a peer's local element batch with a remote batch into one ordered
//! collection. Every peer applies the same rules to the same pair of element
//! versions, so all peers pick the same winner without coordinating:
//!
//! ```text
//! remote r vs local l (same id)
//!   l is being edited locally          → keep l
//!   l.version >  r.version             → keep l
//!   l.version == r.version, l.nonce <  r.nonce → keep l
//!   otherwise                          → take r
//! ```
//!
//! The merged set is then sorted by order key and any duplicate or broken
//! keys the merge produced are repaired.

use std::collections::{HashMap, HashSet};
use std::hash::BuildHasher;

use crate::element::{Element, ElementId};
use crate::fractional::{validate_and_repair, OrderKey};

/// An element sequence whose order keys strictly increase.
///
/// Only produced by [`reconcile`] and [`OrderedElements::from_unordered`], so
/// holding one means the ordering invariant holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedElements(Vec<Element>);

impl OrderedElements {
    /// An empty collection.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Sort, deduplicate and repair an arbitrary element list.
    ///
    /// Duplicate ids are arbitrated with the same version rule as remote
    /// updates.
    #[must_use]
    pub fn from_unordered(elements: Vec<Element>) -> Self {
        reconcile(&Self::new(), elements, &HashSet::new())
    }

    /// The elements in order.
    #[must_use]
    pub fn as_slice(&self) -> &[Element] {
        &self.0
    }

    /// Iterate in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Element> {
        self.0.iter()
    }

    /// Number of elements, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Find an element by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Element> {
        self.0.iter().find(|e| e.id.as_str() == id)
    }

    /// Take the underlying vector.
    #[must_use]
    pub fn into_vec(self) -> Vec<Element> {
        self.0
    }
}

impl<'a> IntoIterator for &'a OrderedElements {
    type Item = &'a Element;
    type IntoIter = std::slice::Iter<'a, Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// What a reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Remote elements that replaced or were added to the local set.
    pub remote_applied: usize,
    /// Remote elements dropped in favour of the local copy.
    pub remote_discarded: usize,
    /// Subset of `remote_discarded` dropped because the element is being edited.
    pub protected_by_edit: usize,
    /// Repeated ids within the remote batch itself.
    pub remote_duplicates: usize,
    /// Local elements the remote batch did not mention.
    pub local_only: usize,
    /// Order keys rewritten after sorting.
    pub keys_repaired: usize,
}

impl ReconcileReport {
    /// Whether any remote element made it into the result.
    #[must_use]
    pub const fn has_remote_changes(&self) -> bool {
        self.remote_applied > 0
    }
}

/// Decide whether `remote` loses to the local copy of the same element.
#[must_use]
pub fn should_discard_remote<S: BuildHasher>(
    local: &Element,
    remote: &Element,
    active_ids: &HashSet<ElementId, S>,
) -> bool {
    active_ids.contains(&local.id) || outranks(local, remote)
}

/// Merge a remote batch into the local collection.
///
/// Pure: no I/O, no shared state. Callers install the result themselves.
#[must_use]
pub fn reconcile<S: BuildHasher>(
    local: &OrderedElements,
    remote: Vec<Element>,
    active_ids: &HashSet<ElementId, S>,
) -> OrderedElements {
    reconcile_with_report(local, remote, active_ids).0
}

/// [`reconcile`], also reporting what happened.
#[must_use]
pub fn reconcile_with_report<S: BuildHasher>(
    local: &OrderedElements,
    remote: Vec<Element>,
    active_ids: &HashSet<ElementId, S>,
) -> (OrderedElements, ReconcileReport) {
    let local_by_id: HashMap<&ElementId, &Element> = local.iter().map(|e| (&e.id, e)).collect();
    let mut report = ReconcileReport::default();
    let mut merged: Vec<Element> = Vec::with_capacity(local.len() + remote.len());
    let mut slots: HashMap<ElementId, Slot> = HashMap::with_capacity(remote.len());

    for incoming in remote {
        if let Some(slot) = slots.get_mut(&incoming.id) {
            report.remote_duplicates += 1;
            let protected = local_by_id.contains_key(&incoming.id) && active_ids.contains(&incoming.id);
            if !protected && !outranks(&merged[slot.position], &incoming) {
                if slot.holds_local {
                    report.remote_discarded -= 1;
                    report.remote_applied += 1;
                    slot.holds_local = false;
                }
                merged[slot.position] = incoming;
            }
            continue;
        }

        let (winner, holds_local) = match local_by_id.get(&incoming.id) {
            Some(&existing) if should_discard_remote(existing, &incoming, active_ids) => {
                report.remote_discarded += 1;
                if active_ids.contains(&existing.id) {
                    report.protected_by_edit += 1;
                }
                (existing.clone(), true)
            }
            _ => {
                report.remote_applied += 1;
                (incoming, false)
            }
        };
        slots.insert(
            winner.id.clone(),
            Slot {
                position: merged.len(),
                holds_local,
            },
        );
        merged.push(winner);
    }

    for element in local {
        if !slots.contains_key(&element.id) {
            report.local_only += 1;
            merged.push(element.clone());
        }
    }

    let mut merged = sort_by_index(merged);
    report.keys_repaired = validate_and_repair(&mut merged);

    tracing::debug!(
        applied = report.remote_applied,
        discarded = report.remote_discarded,
        protected = report.protected_by_edit,
        duplicates = report.remote_duplicates,
        local_only = report.local_only,
        repaired = report.keys_repaired,
        "Reconciled element batch"
    );

    (OrderedElements(merged), report)
}

/// Where an id landed in the merge, and whether the local copy is there.
struct Slot {
    position: usize,
    holds_local: bool,
}

/// `a` beats `b` on version, or on nonce when versions tie.
fn outranks(a: &Element, b: &Element) -> bool {
    a.version > b.version || (a.version == b.version && a.version_nonce < b.version_nonce)
}

/// Stable sort by order key.
///
/// An element without a usable key sorts under the key of the nearest keyed
/// element before it, so it stays behind that neighbour. This keeps the
/// comparison a total order.
fn sort_by_index(elements: Vec<Element>) -> Vec<Element> {
    let mut carried: Option<OrderKey> = None;
    let mut keyed: Vec<(Option<OrderKey>, Element)> = elements
        .into_iter()
        .map(|element| {
            if let Some(key) = element.valid_index() {
                carried = Some(key.clone());
            }
            (carried.clone(), element)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.into_iter().map(|(_, element)| element).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn el(id: &str, version: u64, nonce: u32, index: &str) -> Element {
        Element::new(id)
            .with_version(version, nonce)
            .with_index(OrderKey::new(index))
    }

    fn ordered(elements: Vec<Element>) -> OrderedElements {
        OrderedElements::from_unordered(elements)
    }

    fn ids(elements: &OrderedElements) -> Vec<&str> {
        elements.iter().map(|e| e.id.as_str()).collect()
    }

    fn none() -> HashSet<ElementId> {
        HashSet::new()
    }

    #[test]
    fn test_lower_nonce_wins_version_tie() {
        let local = ordered(vec![el("e1", 3, 500, "V")]);
        let remote = vec![el("e1", 3, 200, "V")];

        let merged = reconcile(&local, remote, &none());
        assert_eq!(merged.get("e1").map(|e| e.version_nonce), Some(200));
    }

    #[test]
    fn test_higher_nonce_loses_version_tie() {
        let local = ordered(vec![el("e1", 3, 200, "V")]);
        let remote = vec![el("e1", 3, 500, "V")];

        let merged = reconcile(&local, remote, &none());
        assert_eq!(merged.get("e1").map(|e| e.version_nonce), Some(200));
    }

    #[test]
    fn test_active_edit_protects_local() {
        let local = ordered(vec![el("e1", 1, 0, "V")]);
        let remote = vec![el("e1", 99, 0, "V")];
        let active: HashSet<ElementId> = [ElementId::from("e1")].into_iter().collect();

        let (merged, report) = reconcile_with_report(&local, remote, &active);
        assert_eq!(merged.get("e1").map(|e| e.version), Some(1));
        assert_eq!(report.protected_by_edit, 1);
        assert_eq!(report.remote_discarded, 1);
    }

    #[test]
    fn test_active_id_without_local_copy_accepts_remote() {
        let active: HashSet<ElementId> = [ElementId::from("e1")].into_iter().collect();
        let merged = reconcile(&OrderedElements::new(), vec![el("e1", 4, 0, "V")], &active);
        assert_eq!(merged.get("e1").map(|e| e.version), Some(4));
    }

    #[test]
    fn test_higher_remote_version_wins() {
        let local = ordered(vec![el("e1", 2, 0, "V")]);
        let remote = vec![el("e1", 5, 0, "V")];

        let (merged, report) = reconcile_with_report(&local, remote, &none());
        assert_eq!(merged.get("e1").map(|e| e.version), Some(5));
        assert!(report.has_remote_changes());
    }

    #[test]
    fn test_higher_local_version_wins() {
        let local = ordered(vec![el("e1", 7, 0, "V")]);
        let remote = vec![el("e1", 5, 0, "V")];

        let merged = reconcile(&local, remote, &none());
        assert_eq!(merged.get("e1").map(|e| e.version), Some(7));
    }

    #[test]
    fn test_identical_version_and_nonce_takes_remote() {
        let local = ordered(vec![el("e1", 2, 9, "V").with_field("origin", json!("local"))]);
        let remote = vec![el("e1", 2, 9, "V").with_field("origin", json!("remote"))];

        let merged = reconcile(&local, remote, &none());
        assert_eq!(
            merged.get("e1").map(|e| e.payload["origin"].clone()),
            Some(json!("remote"))
        );
    }

    #[test]
    fn test_empty_remote_returns_local() {
        let local = ordered(vec![el("a", 1, 0, "F"), el("b", 1, 0, "V")]);
        let merged = reconcile(&local, Vec::new(), &none());
        assert_eq!(merged, local);
    }

    #[test]
    fn test_empty_local_returns_sorted_remote() {
        let remote = vec![el("b", 1, 0, "k"), el("a", 1, 0, "F")];
        let merged = reconcile(&OrderedElements::new(), remote, &none());
        assert_eq!(ids(&merged), vec!["a", "b"]);
    }

    #[test]
    fn test_disjoint_sets_union_by_index() {
        let local = ordered(vec![el("a", 1, 0, "F"), el("c", 1, 0, "k")]);
        let remote = vec![el("b", 1, 0, "V"), el("d", 1, 0, "s")];

        let (merged, report) = reconcile_with_report(&local, remote, &none());
        assert_eq!(ids(&merged), vec!["a", "b", "c", "d"]);
        assert_eq!(report.local_only, 2);
        assert_eq!(report.remote_applied, 2);
        assert_eq!(report.keys_repaired, 0);
    }

    #[test]
    fn test_tombstones_are_kept() {
        let local = ordered(vec![el("a", 1, 0, "F")]);
        let mut deleted = el("a", 2, 0, "F");
        deleted.is_deleted = true;

        let merged = reconcile(&local, vec![deleted], &none());
        assert_eq!(merged.len(), 1);
        assert!(merged.get("a").is_some_and(|e| e.is_deleted));
    }

    #[test]
    fn test_colliding_keys_are_repaired() {
        let local = ordered(vec![el("a", 1, 0, "V")]);
        let remote = vec![el("b", 1, 0, "V")];

        let (merged, report) = reconcile_with_report(&local, remote, &none());
        assert_eq!(report.keys_repaired, 1);
        // Remote entries precede local-only ones before the stable sort.
        assert_eq!(ids(&merged), vec!["b", "a"]);
        let keys: Vec<_> = merged.iter().filter_map(Element::valid_index).collect();
        assert!(keys[0] < keys[1]);
    }

    #[test]
    fn test_missing_index_follows_predecessor() {
        let remote = vec![
            el("c", 1, 0, "k"),
            Element::new("unplaced").with_version(1, 0),
            el("a", 1, 0, "F"),
        ];
        let merged = reconcile(&OrderedElements::new(), remote, &none());
        assert_eq!(ids(&merged), vec!["a", "c", "unplaced"]);
        assert!(merged.iter().all(|e| e.valid_index().is_some()));
    }

    #[test]
    fn test_malformed_index_is_repaired_not_rejected() {
        let remote = vec![el("a", 1, 0, "F"), el("b", 1, 0, "??")];
        let (merged, report) = reconcile_with_report(&OrderedElements::new(), remote, &none());
        assert_eq!(report.keys_repaired, 1);
        assert_eq!(ids(&merged), vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_remote_ids_are_arbitrated() {
        let remote = vec![el("e1", 2, 50, "V"), el("e1", 4, 80, "V"), el("e1", 4, 10, "V")];
        let (merged, report) = reconcile_with_report(&OrderedElements::new(), remote, &none());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.get("e1").map(|e| (e.version, e.version_nonce)), Some((4, 10)));
        assert_eq!(report.remote_duplicates, 2);
    }

    #[test]
    fn test_later_duplicate_beating_local_counts_as_applied() {
        let local = ordered(vec![el("e1", 5, 0, "V")]);
        let remote = vec![el("e1", 3, 0, "V"), el("e1", 9, 0, "V")];

        let (merged, report) = reconcile_with_report(&local, remote, &none());
        assert_eq!(merged.get("e1").map(|e| e.version), Some(9));
        assert_eq!(report.remote_applied, 1);
        assert_eq!(report.remote_discarded, 0);
        assert_eq!(report.remote_duplicates, 1);
        assert!(report.has_remote_changes());
    }

    #[test]
    fn test_later_duplicate_losing_to_local_stays_discarded() {
        let local = ordered(vec![el("e1", 5, 0, "V")]);
        let remote = vec![el("e1", 3, 0, "V"), el("e1", 4, 0, "V")];

        let (merged, report) = reconcile_with_report(&local, remote, &none());
        assert_eq!(merged.get("e1").map(|e| e.version), Some(5));
        assert_eq!(report.remote_applied, 0);
        assert_eq!(report.remote_discarded, 1);
        assert!(!report.has_remote_changes());
    }

    #[test]
    fn test_duplicate_remote_ids_respect_active_edit() {
        let local = ordered(vec![el("e1", 1, 0, "V")]);
        let active: HashSet<ElementId> = [ElementId::from("e1")].into_iter().collect();
        let remote = vec![el("e1", 5, 0, "V"), el("e1", 6, 0, "V")];

        let merged = reconcile(&local, remote, &active);
        assert_eq!(merged.get("e1").map(|e| e.version), Some(1));
    }

    #[test]
    fn test_idempotent_with_empty_remote() {
        let local = ordered(vec![el("a", 1, 0, "V"), el("b", 2, 0, "k")]);
        let remote = vec![
            el("b", 3, 0, "V"),
            Element::new("c").with_version(1, 0),
            el("d", 1, 0, "0"),
        ];
        let once = reconcile(&local, remote, &none());
        let twice = reconcile(&once, Vec::new(), &none());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_deterministic_output() {
        let local = ordered(vec![el("a", 1, 3, "V"), el("b", 2, 1, "V"), el("c", 1, 0, "k")]);
        let remote = vec![el("b", 2, 0, "F"), el("d", 1, 0, "V"), el("a", 1, 2, "k")];

        let first = reconcile(&local, remote.clone(), &none());
        for _ in 0..20 {
            assert_eq!(reconcile(&local, remote.clone(), &none()), first);
        }
    }

    #[test]
    fn test_from_unordered_large_unplaced_scene() {
        let elements: Vec<Element> = (0..40_000)
            .map(|i| Element::new(format!("e{i}")).with_version(1, 0))
            .collect();

        let ordered = OrderedElements::from_unordered(elements);
        assert_eq!(ordered.len(), 40_000);
        let keys: Vec<_> = ordered.iter().filter_map(Element::valid_index).collect();
        assert_eq!(keys.len(), 40_000);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert!(keys.iter().all(|k| k.as_str().len() <= 4));
    }

    #[test]
    fn test_repeated_long_remote_key_is_repaired() {
        let long = "z".repeat(5_001);
        let remote = vec![el("a", 1, 0, &long), el("b", 1, 0, &long)];

        let (merged, report) = reconcile_with_report(&OrderedElements::new(), remote, &none());
        assert_eq!(report.keys_repaired, 1);
        assert_eq!(ids(&merged), vec!["a", "b"]);
        let keys: Vec<_> = merged.iter().filter_map(Element::valid_index).collect();
        assert_eq!(keys.len(), 2);
        assert!(keys[0] < keys[1]);
    }

    #[test]
    fn test_from_unordered_dedupes() {
        let elements = vec![el("a", 1, 0, "V"), el("a", 3, 0, "F")];
        let ordered = OrderedElements::from_unordered(elements);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered.get("a").map(|e| e.version), Some(3));
    }
}
