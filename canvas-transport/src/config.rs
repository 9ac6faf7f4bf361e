//! Transport configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default delay before the first reconnect attempt, in milliseconds.
const DEFAULT_RECONNECT_BASE_MS: u64 = 1000;

/// Default number of reconnect attempts before giving up.
const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Default capacity of the outbound frame queue.
const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Default capacity of the inbound frame queue.
const DEFAULT_INBOUND_BUFFER: usize = 256;

/// Exponential backoff for reconnecting after an unexpected close.
///
/// Attempt `n` (0-indexed) waits `base_delay_ms * 2^n`. After
/// `max_attempts` failed attempts the client gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Attempts allowed before reporting exhaustion.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_RECONNECT_BASE_MS,
            max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Create a policy with custom values.
    #[must_use]
    pub const fn new(base_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_delay_ms,
            max_attempts,
        }
    }

    /// Delay before the given attempt (0-indexed). Saturates instead of
    /// overflowing.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2_u64.checked_pow(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Settings for a [`TransportClient`](crate::TransportClient) and its
/// connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Reconnect backoff.
    pub reconnect: ReconnectPolicy,
    /// Frames that may wait to be written before `emit` starts dropping.
    pub outbound_buffer: usize,
    /// Frames that may wait to be handled before the reader applies
    /// backpressure.
    pub inbound_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            inbound_buffer: DEFAULT_INBOUND_BUFFER,
        }
    }
}

impl TransportConfig {
    /// Read overrides from the environment.
    ///
    /// - `CANVAS_RECONNECT_BASE_MS`
    /// - `CANVAS_RECONNECT_MAX_ATTEMPTS`
    /// - `CANVAS_OUTBOUND_BUFFER`
    /// - `CANVAS_INBOUND_BUFFER`
    ///
    /// Missing or unparsable values keep their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parse<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
            default: T,
        ) -> T {
            match lookup(key) {
                Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                    tracing::warn!(key, value = %raw, "Ignoring invalid transport setting");
                    default
                }),
                None => default,
            }
        }

        let defaults = Self::default();
        Self {
            reconnect: ReconnectPolicy {
                base_delay_ms: parse(
                    &lookup,
                    "CANVAS_RECONNECT_BASE_MS",
                    defaults.reconnect.base_delay_ms,
                ),
                max_attempts: parse(
                    &lookup,
                    "CANVAS_RECONNECT_MAX_ATTEMPTS",
                    defaults.reconnect.max_attempts,
                ),
            },
            outbound_buffer: parse(&lookup, "CANVAS_OUTBOUND_BUFFER", defaults.outbound_buffer)
                .max(1),
            inbound_buffer: parse(&lookup, "CANVAS_INBOUND_BUFFER", defaults.inbound_buffer)
                .max(1),
        }
    }
}
