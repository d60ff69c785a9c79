//! Parameter Synchronization State
//!
//! Tracks how much of the vehicle's parameter table has been received.
//! The whole state sits behind one reader/writer lock, so a reader always
//! sees the result of a completed write.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::protocol::ProtocolError;

/// Index value the vehicle uses for parameters addressed by name only
pub const NO_INDEX: u16 = u16::MAX;

/// Errors surfaced by parameter access
#[derive(Error, Debug)]
pub enum ParamError {
    #[error("Parameter not found: {0}")]
    NotFound(String),

    #[error("Parameter {name} found, but failed to update: expected {expected}, got {actual}")]
    SetFailed {
        name: String,
        expected: f32,
        actual: f32,
    },

    #[error("Could not retrieve parameter at index {index}")]
    Unavailable { index: u16 },

    #[error("Transport error: {0}")]
    Transport(#[from] ProtocolError),
}

#[derive(Debug, Default)]
struct ParamState {
    total: Option<u16>,
    by_name: HashMap<String, f32>,
    by_index: HashMap<u16, f32>,
    received: BTreeSet<u16>,
    forced: bool,
    started_at: Option<Instant>,
}

impl ParamState {
    fn missing(&self) -> Vec<u16> {
        match self.total {
            Some(total) => (0..total).filter(|i| !self.received.contains(i)).collect(),
            None => Vec::new(),
        }
    }

    fn received_in_range(&self) -> usize {
        match self.total {
            Some(total) => self.received.range(..total).count(),
            None => 0,
        }
    }
}

/// Point-in-time copy of the parameter table
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParamSnapshot {
    /// Announced total, once known
    pub total: Option<u16>,
    /// Distinct indices received within the announced total
    pub received: usize,
    /// Values by name
    pub values: HashMap<String, f32>,
    /// Indices still missing
    pub missing: Vec<u16>,
    /// Synchronization was declared good enough despite gaps
    pub forced: bool,
}

/// Shared parameter synchronization state
#[derive(Debug, Default)]
pub struct ParamSync {
    state: RwLock<ParamState>,
}

impl ParamSync {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, ParamState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ParamState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the total announced by the vehicle
    pub fn begin(&self, total: u16) {
        let mut state = self.write();
        if let Some(previous) = state.total {
            if previous != total {
                tracing::warn!(previous, total, "Vehicle changed its parameter count");
            }
        }
        state.total = Some(total);
    }

    /// Store a received parameter. `index` is ignored when it is [`NO_INDEX`].
    pub fn record(&self, index: u16, name: &str, value: f32) {
        let mut state = self.write();
        state.by_name.insert(name.to_string(), value);
        if index != NO_INDEX {
            state.by_index.insert(index, value);
            state.received.insert(index);
        }
    }

    /// Indices below the announced total that have not been received
    pub fn missing(&self) -> Vec<u16> {
        self.read().missing()
    }

    /// Treat synchronization as complete despite missing entries
    pub fn force_complete(&self) {
        self.write().forced = true;
    }

    /// True once [`ParamSync::force_complete`] was called
    pub fn is_forced(&self) -> bool {
        self.read().forced
    }

    /// Total known and nothing missing, or forced
    pub fn is_complete(&self) -> bool {
        let state = self.read();
        state.forced || (state.total.is_some() && state.missing().is_empty())
    }

    /// Announced total
    pub fn total(&self) -> Option<u16> {
        self.read().total
    }

    /// Look up a value by name
    pub fn get(&self, name: &str) -> Option<f32> {
        self.read().by_name.get(name).copied()
    }

    /// Look up a value by index
    pub fn get_by_index(&self, index: u16) -> Option<f32> {
        self.read().by_index.get(&index).copied()
    }

    /// Mark the start of a synchronization round (full list requested)
    pub fn mark_started(&self, now: Instant) {
        self.write().started_at = Some(now);
    }

    /// True once a synchronization round has been started
    pub fn is_started(&self) -> bool {
        self.read().started_at.is_some()
    }

    /// Percentage of the announced total received so far
    pub fn progress(&self) -> u8 {
        let state = self.read();
        match state.total {
            Some(0) => 100,
            Some(total) => ((state.received_in_range() * 100) / total as usize) as u8,
            None => 0,
        }
    }

    /// Force completion if the round started more than `timeout` ago and is
    /// still incomplete. Returns the unresolved indices when it fires.
    pub fn expire(&self, now: Instant, timeout: Duration) -> Option<Vec<u16>> {
        let mut state = self.write();
        let started = state.started_at?;
        if state.forced || now.saturating_duration_since(started) <= timeout {
            return None;
        }
        let missing = state.missing();
        if state.total.is_some() && missing.is_empty() {
            return None;
        }
        state.forced = true;
        Some(missing)
    }

    /// Forget everything, ready for a new synchronization round
    pub fn reset(&self) {
        *self.write() = ParamState::default();
    }

    /// Copy out the current table
    pub fn snapshot(&self) -> ParamSnapshot {
        let state = self.read();
        ParamSnapshot {
            total: state.total,
            received: state.received_in_range(),
            values: state.by_name.clone(),
            missing: state.missing(),
            forced: state.forced,
        }
    }
}
