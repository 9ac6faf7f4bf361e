//! Error types for ordering and reconciliation.

use thiserror::Error;

/// Result type for fractional index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors raised by the fractional indexer.
///
/// These indicate a logic defect upstream (a caller passed bounds that cannot
/// both hold). Ordering corruption inside an element sequence is never
/// reported through this type; it is repaired in place.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// The lower bound is not strictly below the upper bound.
    #[error("Invalid key order: {lower} >= {upper}")]
    InvalidOrder {
        /// Requested lower bound.
        lower: String,
        /// Requested upper bound.
        upper: String,
    },

    /// A bound is not a well-formed order key.
    #[error("Invalid order key: {0:?}")]
    InvalidKey(String),
}
