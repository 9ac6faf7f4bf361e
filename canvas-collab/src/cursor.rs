//! Remote cursor smoothing.
//!
//! Pointer positions arrive from the network at irregular intervals. Drawing
//! them as received makes remote cursors jump, so each peer's cursor is pulled
//! toward its latest reported position by a critically damped spring, stepped
//! once per rendered frame:
//!
//! ```text
//! update_target(peer, x, y)        tick(now)  (every frame)
//!        │                              │
//!        ▼                              ▼
//!   target ◄── spring ── current ── velocity
//! ```
//!
//! Each [`CursorInterpolator`] owns its peer map, so independent canvases (and
//! tests) never share cursor state.

use std::collections::{HashMap, HashSet};
use std::hash::BuildHasher;
use std::time::{Duration, Instant};

/// A position in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

impl Point {
    /// Create a point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    const ZERO: Self = Self::new(0.0, 0.0);

    fn length(self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// Spring tuning for [`CursorInterpolator`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpringConfig {
    /// Pull toward the target per frame.
    pub stiffness: f64,
    /// Velocity damping per frame.
    pub damping: f64,
    /// A peer silent for longer than this jumps straight to its target.
    pub snap_threshold: Duration,
    /// Remaining distance below which the cursor may settle.
    pub position_epsilon: f64,
    /// Remaining speed below which the cursor may settle.
    pub velocity_epsilon: f64,
}

impl SpringConfig {
    /// A critically damped spring with the given stiffness.
    #[must_use]
    pub fn critically_damped(stiffness: f64) -> Self {
        Self {
            stiffness,
            damping: 2.0 * stiffness.sqrt(),
            ..Self::default()
        }
    }
}

impl Default for SpringConfig {
    fn default() -> Self {
        const STIFFNESS: f64 = 0.15;
        Self {
            stiffness: STIFFNESS,
            damping: 2.0 * STIFFNESS.sqrt(),
            snap_threshold: Duration::from_millis(500),
            position_epsilon: 0.01,
            velocity_epsilon: 0.01,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CursorState {
    target: Point,
    current: Point,
    velocity: Point,
    last_update: Instant,
}

impl CursorState {
    fn settle(&mut self) {
        self.current = self.target;
        self.velocity = Point::ZERO;
    }
}

/// Per-peer spring smoothing of remote pointer positions.
///
/// Not internally synchronized: one render loop owns it and calls
/// [`tick`](Self::tick) once per frame.
#[derive(Debug, Clone, Default)]
pub struct CursorInterpolator {
    peers: HashMap<String, CursorState>,
    config: SpringConfig,
}

impl CursorInterpolator {
    /// Create an interpolator with default spring tuning.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an interpolator with custom spring tuning.
    #[must_use]
    pub fn with_config(config: SpringConfig) -> Self {
        Self {
            peers: HashMap::new(),
            config,
        }
    }

    /// The spring tuning in use.
    #[must_use]
    pub const fn config(&self) -> &SpringConfig {
        &self.config
    }

    /// Record a new reported position for a peer.
    ///
    /// The first report for a peer places its cursor directly on the target,
    /// with no trail from the origin. Returns the cursor's current rendered
    /// position.
    pub fn update_target(&mut self, peer_id: &str, x: f64, y: f64, now: Instant) -> Point {
        let target = Point::new(x, y);
        if let Some(state) = self.peers.get_mut(peer_id) {
            state.target = target;
            state.last_update = now;
            return state.current;
        }
        self.peers.insert(
            peer_id.to_string(),
            CursorState {
                target,
                current: target,
                velocity: Point::ZERO,
                last_update: now,
            },
        );
        target
    }

    /// Advance every cursor by one frame.
    pub fn tick(&mut self, now: Instant) {
        let config = self.config;
        for state in self.peers.values_mut() {
            if now.saturating_duration_since(state.last_update) > config.snap_threshold {
                state.settle();
                continue;
            }

            let ax = config.stiffness * (state.target.x - state.current.x)
                - config.damping * state.velocity.x;
            let ay = config.stiffness * (state.target.y - state.current.y)
                - config.damping * state.velocity.y;
            state.velocity.x += ax;
            state.velocity.y += ay;
            state.current.x += state.velocity.x;
            state.current.y += state.velocity.y;

            let gap = Point::new(
                state.target.x - state.current.x,
                state.target.y - state.current.y,
            );
            if gap.length() < config.position_epsilon
                && state.velocity.length() < config.velocity_epsilon
            {
                state.settle();
            }
        }
    }

    /// A peer's rendered position.
    #[must_use]
    pub fn position(&self, peer_id: &str) -> Option<Point> {
        self.peers.get(peer_id).map(|state| state.current)
    }

    /// A peer's last reported position.
    #[must_use]
    pub fn target(&self, peer_id: &str) -> Option<Point> {
        self.peers.get(peer_id).map(|state| state.target)
    }

    /// All rendered positions, sorted by peer ID.
    #[must_use]
    pub fn positions(&self) -> Vec<(&str, Point)> {
        let mut positions: Vec<_> = self
            .peers
            .iter()
            .map(|(id, state)| (id.as_str(), state.current))
            .collect();
        positions.sort_by(|a, b| a.0.cmp(b.0));
        positions
    }

    /// Forget one peer. Returns whether it was tracked.
    pub fn remove(&mut self, peer_id: &str) -> bool {
        self.peers.remove(peer_id).is_some()
    }

    /// Keep only the given peers, returning how many were dropped.
    pub fn retain_peers<S: BuildHasher>(&mut self, present: &HashSet<String, S>) -> usize {
        let before = self.peers.len();
        self.peers.retain(|id, _| present.contains(id));
        before - self.peers.len()
    }

    /// Forget every peer.
    pub fn clear(&mut self) {
        self.peers.clear();
    }

    /// Number of tracked peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peers are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
