//! Glue between transport events and the local scene.
//!
//! A [`CollabSession`] turns [`TransportEvent`]s into store merges and cursor
//! moves. Decryption is delegated to a [`PayloadDecoder`] so the session
//! itself never sees keys.

use std::collections::HashSet;
use std::hash::BuildHasher;
use std::sync::Arc;
use std::time::Instant;

use canvas_collab::{
    BroadcastTracker, CursorInterpolator, Element, ElementId, ReconcileReport, SceneSnapshot,
    SceneStore,
};
use serde::{Deserialize, Serialize};

use crate::event::{EncryptedPayload, TransportEvent};

/// A decrypted collaboration message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum RemotePayload {
    /// Changed elements from a peer.
    SceneUpdate {
        /// The batch to reconcile.
        elements: Vec<Element>,
    },
    /// A peer's pointer moved.
    PointerUpdate {
        /// The peer.
        peer_id: String,
        /// Canvas X.
        x: f64,
        /// Canvas Y.
        y: f64,
    },
}

/// Turns an encrypted payload into a [`RemotePayload`].
pub trait PayloadDecoder {
    /// Why a payload could not be decoded.
    type Error: std::fmt::Display;

    /// Decrypt and deserialize one payload.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` if the payload cannot be opened or parsed.
    fn decode(&self, payload: &EncryptedPayload) -> Result<RemotePayload, Self::Error>;
}

/// Reads the ciphertext as plaintext JSON. For unencrypted development
/// rooms.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPayloadDecoder;

impl JsonPayloadDecoder {
    /// Build a payload this decoder accepts.
    ///
    /// # Errors
    ///
    /// Returns an error if `payload` cannot be serialized.
    pub fn encode(
        payload: &RemotePayload,
        iv: impl Into<Vec<u8>>,
    ) -> Result<EncryptedPayload, serde_json::Error> {
        Ok(EncryptedPayload::new(serde_json::to_vec(payload)?, iv))
    }
}

impl PayloadDecoder for JsonPayloadDecoder {
    type Error = serde_json::Error;

    fn decode(&self, payload: &EncryptedPayload) -> Result<RemotePayload, Self::Error> {
        serde_json::from_slice(&payload.ciphertext)
    }
}

/// What handling one event changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Nothing relevant to the session.
    Ignored,
    /// A remote batch was reconciled into the store.
    Scene(ReconcileReport),
    /// A peer's cursor target moved.
    Cursor {
        /// The peer.
        peer_id: String,
    },
    /// Cursors were dropped for departed peers.
    Presence {
        /// Cursors removed.
        removed: usize,
    },
    /// The link reopened; the whole scene should be re-broadcast.
    Resync,
    /// A payload could not be decoded and was discarded.
    Dropped,
}

/// One participant's view of a room: scene, remote cursors, and broadcast
/// bookkeeping.
#[derive(Debug)]
pub struct CollabSession<D> {
    store: SceneStore,
    cursors: CursorInterpolator,
    broadcast: BroadcastTracker,
    decoder: D,
}

impl<D: PayloadDecoder> CollabSession<D> {
    /// Start with an empty scene.
    #[must_use]
    pub fn new(decoder: D) -> Self {
        Self::with_store(SceneStore::new(), decoder)
    }

    /// Start from an existing store.
    #[must_use]
    pub fn with_store(store: SceneStore, decoder: D) -> Self {
        Self {
            store,
            cursors: CursorInterpolator::new(),
            broadcast: BroadcastTracker::new(),
            decoder,
        }
    }

    /// The scene store. Clones share the same scene.
    #[must_use]
    pub const fn store(&self) -> &SceneStore {
        &self.store
    }

    /// The current scene.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SceneSnapshot> {
        self.store.snapshot()
    }

    /// Remote cursors.
    #[must_use]
    pub const fn cursors(&self) -> &CursorInterpolator {
        &self.cursors
    }

    /// Apply one transport event.
    ///
    /// `active_ids` are the elements the local user is editing right now;
    /// remote versions of those are not applied.
    pub fn handle_event<S: BuildHasher>(
        &mut self,
        event: &TransportEvent,
        active_ids: &HashSet<ElementId, S>,
        now: Instant,
    ) -> SessionUpdate {
        match event {
            TransportEvent::RemoteUpdate(payload) => self.apply_payload(payload, active_ids, now),
            TransportEvent::PresenceUpdate { connections } => {
                let present: HashSet<String> = connections.iter().cloned().collect();
                let removed = self.cursors.retain_peers(&present);
                SessionUpdate::Presence { removed }
            }
            TransportEvent::PeerLeft { peer_id } => SessionUpdate::Presence {
                removed: usize::from(self.cursors.remove(peer_id)),
            },
            TransportEvent::Disconnected { .. } => {
                let removed = self.cursors.len();
                self.cursors.clear();
                SessionUpdate::Presence { removed }
            }
            TransportEvent::Connected => {
                self.broadcast.reset();
                SessionUpdate::Resync
            }
            _ => SessionUpdate::Ignored,
        }
    }

    fn apply_payload<S: BuildHasher>(
        &mut self,
        payload: &EncryptedPayload,
        active_ids: &HashSet<ElementId, S>,
        now: Instant,
    ) -> SessionUpdate {
        match self.decoder.decode(payload) {
            Ok(RemotePayload::SceneUpdate { elements }) => {
                let report = self.store.apply_remote(elements, active_ids);
                tracing::debug!(?report, "Applied remote scene update");
                SessionUpdate::Scene(report)
            }
            Ok(RemotePayload::PointerUpdate { peer_id, x, y }) => {
                self.cursors.update_target(&peer_id, x, y, now);
                SessionUpdate::Cursor { peer_id }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable remote update");
                SessionUpdate::Dropped
            }
        }
    }

    /// Install the editing surface's elements as the local scene.
    #[must_use]
    pub fn replace_local(&self, elements: Vec<Element>) -> Arc<SceneSnapshot> {
        self.store.replace_local(elements)
    }

    /// Elements changed since the last call, marked as sent.
    pub fn take_pending_broadcast(&mut self) -> Vec<Element> {
        let pending = self.broadcast.pending(&self.store.snapshot());
        self.broadcast.mark_sent(&pending);
        pending
    }

    /// Advance remote cursors by one frame.
    pub fn tick(&mut self, now: Instant) {
        self.cursors.tick(now);
    }
}
