//! # Saorsa Canvas Collaboration Core
//!
//! Deterministic convergence of concurrently edited canvas scenes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               canvas-collab                 │
//! ├─────────────────────────────────────────────┤
//! │  Fractional Index │  Reconciler             │
//! │  - Order keys     │  - Version authority    │
//! │  - Repair         │  - Nonce tie-break      │
//! │                   │  - Edit protection      │
//! ├─────────────────────────────────────────────┤
//! │  Scene Store      │  Cursor Interpolator    │
//! │  - Atomic swap    │  - Spring smoothing     │
//! │  - Broadcast diff │  - Idle snapping        │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Everything here is synchronous and free of I/O. The transport lives in
//! `canvas-transport`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cursor;
pub mod element;
pub mod error;
pub mod fractional;
pub mod reconcile;
pub mod store;

pub use cursor::{CursorInterpolator, Point, SpringConfig};
pub use element::{Element, ElementId};
pub use error::{IndexError, IndexResult};
pub use fractional::{is_valid_key, key_between, keys_between, validate_and_repair, OrderKey};
pub use reconcile::{
    reconcile, reconcile_with_report, should_discard_remote, OrderedElements, ReconcileReport,
};
pub use store::{BroadcastTracker, SceneSnapshot, SceneStore};

/// Collaboration core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
