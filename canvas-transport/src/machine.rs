//! Connection lifecycle, free of I/O.
//!
//! ```text
//!            connect()
//!               │
//!               ▼
//!   ┌────► Connecting ──opened──► Open ──close()──► ClosedIntentional
//!   │           │                  │
//!   │        failed               lost
//!   │           ▼                  ▼
//!   │      ClosedUnexpected ◄──────┘
//!   │           │
//!   │   attempts left? ──no──► Exhausted
//!   │           │yes
//!   │           ▼
//!   └─────  Reconnecting (one timer)
//! ```
//!
//! The driver task in [`client`](crate::client) feeds socket outcomes in and
//! acts on the decisions that come out.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ReconnectPolicy;

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// `connect` has not been called.
    #[default]
    Idle,
    /// Dialing the server.
    Connecting,
    /// Link established; frames flow.
    Open,
    /// Closed by the local client. Terminal.
    ClosedIntentional,
    /// Lost without being asked to.
    ClosedUnexpected,
    /// Waiting for the reconnect timer.
    Reconnecting,
    /// Reconnect attempts used up. Terminal.
    Exhausted,
}

impl ConnectionState {
    /// Whether no further transitions will happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::ClosedIntentional | Self::Exhausted)
    }
}

/// What to do after an unexpected close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Dial again after `delay`.
    Retry {
        /// 1-based attempt number.
        attempt: u32,
        /// Wait before dialing.
        delay: Duration,
    },
    /// Stop trying.
    GiveUp,
}

/// Point-in-time view of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Connection {
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Reconnect attempts made since the last successful open.
    pub attempt: u32,
    /// Delay of the pending reconnect, if one is scheduled.
    pub next_delay: Option<Duration>,
}

/// Pure state transitions for one client connection.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    connection: Connection,
    policy: ReconnectPolicy,
}

impl ConnectionMachine {
    /// Create an idle machine.
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            connection: Connection::default(),
            policy,
        }
    }

    /// Current snapshot.
    #[must_use]
    pub const fn connection(&self) -> Connection {
        self.connection
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.connection.state
    }

    /// Start a fresh connection. Resets the attempt counter.
    pub fn start(&mut self) {
        self.connection = Connection {
            state: ConnectionState::Connecting,
            attempt: 0,
            next_delay: None,
        };
    }

    /// The reconnect timer fired. Returns `false` if the connection has
    /// since reached a terminal state.
    pub fn redial(&mut self) -> bool {
        if self.connection.state != ConnectionState::Reconnecting {
            return false;
        }
        self.connection.state = ConnectionState::Connecting;
        self.connection.next_delay = None;
        true
    }

    /// The link opened.
    pub fn opened(&mut self) {
        self.connection = Connection {
            state: ConnectionState::Open,
            attempt: 0,
            next_delay: None,
        };
    }

    /// The link closed or the dial failed without the client asking.
    ///
    /// Returns `None` if the connection is already terminal, so a stale
    /// failure can never schedule a second timer.
    pub fn lost(&mut self) -> Option<ReconnectDecision> {
        match self.connection.state {
            ConnectionState::Connecting | ConnectionState::Open => {}
            _ => return None,
        }

        self.connection.state = ConnectionState::ClosedUnexpected;
        if self.connection.attempt >= self.policy.max_attempts {
            self.connection.state = ConnectionState::Exhausted;
            self.connection.next_delay = None;
            return Some(ReconnectDecision::GiveUp);
        }

        let delay = self.policy.delay_for_attempt(self.connection.attempt);
        self.connection.attempt += 1;
        self.connection.state = ConnectionState::Reconnecting;
        self.connection.next_delay = Some(delay);
        Some(ReconnectDecision::Retry {
            attempt: self.connection.attempt,
            delay,
        })
    }

    /// The client closed the connection. Cancels any pending reconnect.
    ///
    /// Returns whether this changed anything.
    pub fn closed(&mut self) -> bool {
        if self.connection.state.is_terminal() {
            return false;
        }
        self.connection.state = ConnectionState::ClosedIntentional;
        self.connection.next_delay = None;
        true
    }
}
