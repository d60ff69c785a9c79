//! Link Health Monitor
//!
//! One watchdog per tracked message kind. Each watchdog runs its own timer
//! task; when the time since the last [`Watchdog::update`] exceeds the
//! configured interval it reports [`Health::Down`] once, and stays quiet
//! until a fresh update re-arms it. Transitions are delivered as
//! [`HealthEvent`]s on a channel owned by whoever created the monitor.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Liveness of a message kind or subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Health {
    /// Nothing seen yet
    #[default]
    Unknown,
    /// Seen within the expected interval
    Up,
    /// Not seen for longer than the expected interval
    Down,
}

/// A watchdog transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthEvent {
    /// Message kind the watchdog covers
    pub kind: u8,
    /// New health
    pub health: Health,
}

#[derive(Debug)]
struct WatchdogState {
    last_seen: Instant,
    health: Health,
}

/// Liveness timer for a single message kind
#[derive(Debug)]
pub struct Watchdog {
    kind: u8,
    interval: Duration,
    state: Arc<Mutex<WatchdogState>>,
    events: mpsc::UnboundedSender<HealthEvent>,
    stop: CancellationToken,
}

impl Watchdog {
    /// Start a watchdog task ticking every `interval`. The task ends when
    /// either `parent` is cancelled or [`Watchdog::stop`] is called.
    pub fn spawn(
        kind: u8,
        interval: Duration,
        events: mpsc::UnboundedSender<HealthEvent>,
        parent: &CancellationToken,
    ) -> Self {
        let state = Arc::new(Mutex::new(WatchdogState {
            last_seen: Instant::now(),
            health: Health::Unknown,
        }));
        let stop = parent.child_token();

        let task_state = Arc::clone(&state);
        let task_events = events.clone();
        let task_stop = stop.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = task_stop.cancelled() => break,
                    now = ticker.tick() => {
                        if let Some(health) = check_stale(&task_state, interval, now) {
                            tracing::debug!(kind, "Watchdog reports message kind stale");
                            // Receiver gone means the owner shut down
                            if task_events.send(HealthEvent { kind, health }).is_err() {
                                break;
                            }
                        }
                    }
                }
            }
            tracing::trace!(kind, "Watchdog stopped");
        });

        Self {
            kind,
            interval,
            state,
            events,
            stop,
        }
    }

    /// Record that a message of this kind was just seen
    pub fn update(&self) {
        let became_up = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.last_seen = Instant::now();
            let changed = state.health != Health::Up;
            state.health = Health::Up;
            changed
        };
        if became_up {
            let _ = self.events.send(HealthEvent {
                kind: self.kind,
                health: Health::Up,
            });
        }
    }

    /// Current health
    pub fn health(&self) -> Health {
        self.state
            .lock()
            .map(|s| s.health)
            .unwrap_or_else(|e| e.into_inner().health)
    }

    /// Message kind covered
    pub fn kind(&self) -> u8 {
        self.kind
    }

    /// Expected interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Permanently retire the watchdog's timer task
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Tick check: mark the kind down if it went stale and is not down already.
fn check_stale(state: &Mutex<WatchdogState>, interval: Duration, now: Instant) -> Option<Health> {
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    if state.health == Health::Down {
        return None;
    }
    if now.saturating_duration_since(state.last_seen) > interval {
        state.health = Health::Down;
        return Some(Health::Down);
    }
    None
}

/// Set of watchdogs, one per tracked kind
#[derive(Debug)]
pub struct HealthMonitor {
    watchdogs: HashMap<u8, Watchdog>,
    events: mpsc::UnboundedSender<HealthEvent>,
    cancel: CancellationToken,
}

impl HealthMonitor {
    /// Create an empty monitor and the receiving end of its event channel
    pub fn new(cancel: CancellationToken) -> (Self, mpsc::UnboundedReceiver<HealthEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                watchdogs: HashMap::new(),
                events,
                cancel,
            },
            rx,
        )
    }

    /// Start watching a kind. Re-tracking a kind replaces its watchdog.
    pub fn track(&mut self, kind: u8, interval: Duration) {
        let watchdog = Watchdog::spawn(kind, interval, self.events.clone(), &self.cancel);
        if let Some(old) = self.watchdogs.insert(kind, watchdog) {
            old.stop();
        }
    }

    /// Feed a "message seen" event. Returns false for untracked kinds.
    pub fn update(&self, kind: u8) -> bool {
        match self.watchdogs.get(&kind) {
            Some(watchdog) => {
                watchdog.update();
                true
            }
            None => false,
        }
    }

    /// Health of a tracked kind
    pub fn health(&self, kind: u8) -> Option<Health> {
        self.watchdogs.get(&kind).map(Watchdog::health)
    }

    /// Kinds currently tracked
    pub fn tracked(&self) -> impl Iterator<Item = u8> + '_ {
        self.watchdogs.keys().copied()
    }

    /// Stop every watchdog task
    pub fn stop_all(&self) {
        for watchdog in self.watchdogs.values() {
            watchdog.stop();
        }
    }
}
