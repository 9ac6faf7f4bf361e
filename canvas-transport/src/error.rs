//! Error types for the collaboration transport.

use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that end or prevent a connection.
///
/// These drive the reconnect policy; none of them escape from
/// [`TransportClient::emit`](crate::TransportClient::emit).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server URL could not be parsed.
    #[error("Invalid server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The URL scheme is not a WebSocket scheme.
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// The WebSocket layer failed.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The connection could not be established.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The link to the server is gone.
    #[error("Connection closed")]
    Closed,

    /// `connect` was called while a connection is still being driven.
    #[error("Client is already connected")]
    AlreadyConnected,

    /// An outbound message could not be encoded.
    #[error("Encoding error: {0}")]
    Encode(String),
}

/// Reasons an inbound frame is dropped.
///
/// Decode failures are logged and the frame is discarded; the connection is
/// unaffected.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// A text frame is not a well-formed control message.
    #[error("Malformed control message: {0}")]
    Json(#[from] serde_json::Error),

    /// A base64 field did not decode.
    #[error("Invalid base64 in {field}: {source}")]
    Base64 {
        /// The offending field.
        field: &'static str,
        /// Underlying decoder error.
        #[source]
        source: base64::DecodeError,
    },

    /// A binary frame ended inside its header.
    #[error("Truncated binary frame: need {needed} bytes, got {actual}")]
    Truncated {
        /// Bytes the header promised.
        needed: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// A payload arrived without an initialization vector.
    #[error("Payload carries no IV")]
    MissingIv,
}
