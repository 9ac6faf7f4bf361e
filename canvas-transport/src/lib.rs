//! # Saorsa Canvas Transport
//!
//! Reconnecting room client for collaborative canvases.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  canvas-transport                    │
//! ├──────────────────────────────────────────────────────┤
//! │  TransportClient ── on/off/emit/close                │
//! │       │                                              │
//! │   driver task ── ConnectionMachine ── Timer          │
//! │       │                                              │
//! │   Connector ──► Link (Frame channels) ◄── WsConnector│
//! ├──────────────────────────────────────────────────────┤
//! │  protocol: JSON control messages, IV-framed binary   │
//! │  session:  TransportEvent ──► SceneStore / cursors   │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Encryption is out of scope: payloads arrive and leave as
//! [`EncryptedPayload`]s, and a [`PayloadDecoder`] opens them.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod link;
pub mod machine;
pub mod protocol;
pub mod session;
pub mod timer;
pub mod ws;

pub use client::{ListenerId, TransportClient};
pub use config::{ReconnectPolicy, TransportConfig};
pub use error::{DecodeError, TransportError, TransportResult};
pub use event::{ClientEvent, EncryptedPayload, TransportEvent};
pub use link::{Connector, Link, LinkPeer};
pub use machine::{Connection, ConnectionMachine, ConnectionState, ReconnectDecision};
pub use protocol::{decode_frame, encode_event, ControlMessage, Frame};
pub use session::{CollabSession, JsonPayloadDecoder, PayloadDecoder, RemotePayload, SessionUpdate};
pub use timer::{Timer, TokioTimer};
pub use ws::WsConnector;

/// Transport crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
