//! Wire format for the collaboration room.
//!
//! Two frame kinds share one socket:
//!
//! - **Text** frames carry JSON control messages discriminated by `type`
//!   (kebab-case) with camelCase fields.
//! - **Binary** frames carry one encrypted payload, prefixed with its IV:
//!
//! ```text
//! ┌──────────┬──────────────┬────────────────────┐
//! │ iv_len u8│ iv (iv_len)  │ ciphertext (rest)  │
//! └──────────┴──────────────┴────────────────────┘
//! ```

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, TransportError, TransportResult};
use crate::event::{ClientEvent, EncryptedPayload, TransportEvent};

/// Largest IV the binary header can describe.
pub const MAX_IV_LEN: usize = u8::MAX as usize;

/// A single WebSocket data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Vec<u8>),
}

/// Control messages received from the room server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ControlMessage {
    /// Join acknowledged.
    RoomJoined {
        /// Room the server placed us in.
        #[serde(default)]
        room_id: Option<String>,
    },
    /// No other peers are in the room.
    FirstInRoom,
    /// A peer joined.
    PeerJoined {
        /// The new peer.
        peer_id: String,
    },
    /// A peer left.
    PeerLeft {
        /// The departed peer.
        peer_id: String,
    },
    /// Full presence list.
    PresenceUpdate {
        /// Connection IDs present.
        connections: Vec<String>,
    },
    /// Encrypted payload relayed over the text channel.
    EncryptedCollaboration {
        /// Base64 ciphertext.
        ciphertext: String,
        /// Base64 IV.
        iv: String,
    },
    /// Any `type` this client does not know.
    #[serde(other)]
    Unknown,
}

/// Control messages sent to the room server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
enum OutboundMessage<'a> {
    JoinRoom { room_id: &'a str },
    ServerVolatileBroadcast { ciphertext: String, iv: String },
}

impl ControlMessage {
    /// Convert to the event handed to listeners.
    ///
    /// Returns `Ok(None)` for [`ControlMessage::Unknown`].
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if an encrypted payload's base64 fields do
    /// not decode or its IV is empty.
    pub fn into_event(self) -> Result<Option<TransportEvent>, DecodeError> {
        let event = match self {
            Self::RoomJoined { room_id } => TransportEvent::RoomJoined { room_id },
            Self::FirstInRoom => TransportEvent::FirstInRoom,
            Self::PeerJoined { peer_id } => TransportEvent::PeerJoined { peer_id },
            Self::PeerLeft { peer_id } => TransportEvent::PeerLeft { peer_id },
            Self::PresenceUpdate { connections } => TransportEvent::PresenceUpdate { connections },
            Self::EncryptedCollaboration { ciphertext, iv } => {
                let ciphertext = decode_base64("ciphertext", &ciphertext)?;
                let iv = decode_base64("iv", &iv)?;
                if iv.is_empty() {
                    return Err(DecodeError::MissingIv);
                }
                TransportEvent::RemoteUpdate(EncryptedPayload { ciphertext, iv })
            }
            Self::Unknown => return Ok(None),
        };
        Ok(Some(event))
    }
}

fn decode_base64(field: &'static str, value: &str) -> Result<Vec<u8>, DecodeError> {
    STANDARD
        .decode(value)
        .map_err(|source| DecodeError::Base64 { field, source })
}

/// Classify an inbound frame.
///
/// Binary frames are encrypted payloads; text frames are control messages.
/// `Ok(None)` means the frame was well formed but of a kind this client
/// ignores.
///
/// # Errors
///
/// Returns a [`DecodeError`] if the frame is malformed.
pub fn decode_frame(frame: Frame) -> Result<Option<TransportEvent>, DecodeError> {
    match frame {
        Frame::Binary(bytes) => decode_binary(&bytes).map(|p| Some(TransportEvent::RemoteUpdate(p))),
        Frame::Text(text) => serde_json::from_str::<ControlMessage>(&text)?.into_event(),
    }
}

/// Split an IV-prefixed binary frame.
///
/// # Errors
///
/// Returns [`DecodeError::Truncated`] if the header runs past the end of the
/// frame, or [`DecodeError::MissingIv`] if the IV length is zero.
pub fn decode_binary(bytes: &[u8]) -> Result<EncryptedPayload, DecodeError> {
    let (&iv_len, rest) = bytes.split_first().ok_or(DecodeError::Truncated {
        needed: 1,
        actual: 0,
    })?;
    let iv_len = usize::from(iv_len);
    if iv_len == 0 {
        return Err(DecodeError::MissingIv);
    }
    if rest.len() < iv_len {
        return Err(DecodeError::Truncated {
            needed: 1 + iv_len,
            actual: bytes.len(),
        });
    }
    let (iv, ciphertext) = rest.split_at(iv_len);
    Ok(EncryptedPayload::new(ciphertext, iv))
}

/// Prefix a payload with its IV header.
///
/// # Errors
///
/// Returns [`TransportError::Encode`] if the IV is empty or longer than
/// [`MAX_IV_LEN`].
pub fn encode_binary(payload: &EncryptedPayload) -> TransportResult<Vec<u8>> {
    let iv_len = checked_iv_len(&payload.iv)?;
    let mut bytes = Vec::with_capacity(1 + payload.iv.len() + payload.ciphertext.len());
    bytes.push(iv_len);
    bytes.extend_from_slice(&payload.iv);
    bytes.extend_from_slice(&payload.ciphertext);
    Ok(bytes)
}

fn checked_iv_len(iv: &[u8]) -> TransportResult<u8> {
    if iv.is_empty() {
        return Err(TransportError::Encode("payload has an empty IV".to_string()));
    }
    u8::try_from(iv.len()).map_err(|_| {
        TransportError::Encode(format!(
            "IV of {} bytes exceeds the {MAX_IV_LEN}-byte header limit",
            iv.len()
        ))
    })
}

/// Build the frame for an outbound event.
///
/// # Errors
///
/// Returns [`TransportError::Encode`] if the payload cannot be framed.
pub fn encode_event(event: &ClientEvent) -> TransportResult<Frame> {
    match event {
        ClientEvent::JoinRoom { room_id } => encode_text(&OutboundMessage::JoinRoom { room_id }),
        ClientEvent::Broadcast(payload) => encode_binary(payload).map(Frame::Binary),
        ClientEvent::VolatileBroadcast(payload) => {
            checked_iv_len(&payload.iv)?;
            encode_text(&OutboundMessage::ServerVolatileBroadcast {
                ciphertext: STANDARD.encode(&payload.ciphertext),
                iv: STANDARD.encode(&payload.iv),
            })
        }
    }
}

fn encode_text(message: &OutboundMessage<'_>) -> TransportResult<Frame> {
    serde_json::to_string(message)
        .map(Frame::Text)
        .map_err(|e| TransportError::Encode(e.to_string()))
}
