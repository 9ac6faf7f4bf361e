//! Events flowing in and out of a [`TransportClient`](crate::TransportClient).

use std::time::Duration;

/// An encrypted collaboration payload and the IV it was sealed with.
///
/// The transport never looks inside `ciphertext`; decryption is the
/// caller's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// Sealed bytes.
    pub ciphertext: Vec<u8>,
    /// Initialization vector. Never empty on the wire.
    pub iv: Vec<u8>,
}

impl EncryptedPayload {
    /// Pair ciphertext with its IV.
    #[must_use]
    pub fn new(ciphertext: impl Into<Vec<u8>>, iv: impl Into<Vec<u8>>) -> Self {
        Self {
            ciphertext: ciphertext.into(),
            iv: iv.into(),
        }
    }
}

/// Something to send to the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Ask the server to place this connection in a room. Sent
    /// automatically on every open.
    JoinRoom {
        /// Room to join.
        room_id: String,
    },
    /// Reliable scene broadcast, sent as a binary frame.
    Broadcast(EncryptedPayload),
    /// Best-effort broadcast (pointer moves), sent as a JSON text frame the
    /// server may drop under load.
    VolatileBroadcast(EncryptedPayload),
}

impl ClientEvent {
    /// Wire name, used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join-room",
            Self::Broadcast(_) => "server-broadcast",
            Self::VolatileBroadcast(_) => "server-volatile-broadcast",
        }
    }
}

/// Something that happened on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The link is open and the join request has been sent.
    Connected,
    /// The server accepted the join.
    RoomJoined {
        /// Room the server placed us in, when it says.
        room_id: Option<String>,
    },
    /// We are alone in the room; our scene is authoritative.
    FirstInRoom,
    /// Another peer joined.
    PeerJoined {
        /// The new peer.
        peer_id: String,
    },
    /// A peer left.
    PeerLeft {
        /// The departed peer.
        peer_id: String,
    },
    /// Full list of peers currently in the room.
    PresenceUpdate {
        /// Connection IDs present.
        connections: Vec<String>,
    },
    /// A peer's encrypted update, from either frame kind.
    RemoteUpdate(EncryptedPayload),
    /// The link closed.
    Disconnected {
        /// Whether [`close`](crate::TransportClient::close) caused it.
        intentional: bool,
        /// Human-readable cause.
        reason: String,
    },
    /// A reconnect attempt will start after `delay`.
    ReconnectScheduled {
        /// 1-based attempt number.
        attempt: u32,
        /// Wait before dialing.
        delay: Duration,
    },
    /// Every reconnect attempt failed. Emitted once per connection.
    ReconnectExhausted,
}

impl TransportEvent {
    /// Short name, used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::RoomJoined { .. } => "room-joined",
            Self::FirstInRoom => "first-in-room",
            Self::PeerJoined { .. } => "peer-joined",
            Self::PeerLeft { .. } => "peer-left",
            Self::PresenceUpdate { .. } => "presence-update",
            Self::RemoteUpdate(_) => "remote-update",
            Self::Disconnected { .. } => "disconnect",
            Self::ReconnectScheduled { .. } => "reconnect-scheduled",
            Self::ReconnectExhausted => "reconnect-exhausted",
        }
    }
}
