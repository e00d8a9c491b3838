//! Dependency health state machine.
//!
//! # States
//! - NotInitialized: constructed, never connected
//! - Good: connected and usable
//! - Bad: connection lost, reconnect in progress, liveness timer armed
//! - Critical: liveness timer fired, terminal, escalates to shutdown
//! - Stopped: deliberately disconnected, terminal, no escalation
//!
//! # State Transitions
//! ```text
//! NotInitialized → Good:     first successful connect
//! Good → Bad:                disconnect or error (arms liveness timer)
//! Bad → Good:                reconnect succeeded (cancels liveness timer)
//! Bad → Critical:            liveness timer fired
//! NotInitialized|Good|Bad → Stopped: explicit disconnect (cancels liveness timer)
//! ```
//!
//! # Design Decisions
//! - At most one liveness timer per tracker; every exit from Bad cancels it
//! - A timer only escalates if it is still the armed one and the tracker is still Bad
//! - Listeners run under the tracker lock so they observe transitions in order;
//!   they must not block or call back into the tracker

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::observability::metrics;

/// Lifecycle state of a managed dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    NotInitialized,
    Good,
    Bad,
    Critical,
    Stopped,
}

impl Health {
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::NotInitialized => "NOT_INITIALIZED",
            Health::Good => "GOOD",
            Health::Bad => "BAD",
            Health::Critical => "CRITICAL",
            Health::Stopped => "STOPPED",
        }
    }

    /// Critical and Stopped are never left.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Health::Critical | Health::Stopped)
    }

    /// Numeric code exported as a gauge.
    pub fn code(&self) -> f64 {
        match self {
            Health::NotInitialized => 0.0,
            Health::Good => 1.0,
            Health::Bad => 2.0,
            Health::Critical => 3.0,
            Health::Stopped => 4.0,
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer invoked on every health transition.
pub type HealthListener = Box<dyn Fn(Health) + Send + Sync>;

/// Per-dependency health state with change notification and a liveness timer.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct HealthTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    dependency: String,
    state: Mutex<TrackerState>,
}

struct TrackerState {
    health: Health,
    liveness: Option<LivenessTimer>,
    next_timer_id: u64,
    listeners: Vec<HealthListener>,
}

struct LivenessTimer {
    id: u64,
    handle: JoinHandle<()>,
}

impl HealthTracker {
    /// Create a tracker in `NotInitialized`.
    pub fn new(dependency: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                dependency: dependency.into(),
                state: Mutex::new(TrackerState {
                    health: Health::NotInitialized,
                    liveness: None,
                    next_timer_id: 0,
                    listeners: Vec::new(),
                }),
            }),
        }
    }

    /// Name of the dependency this tracker belongs to.
    pub fn dependency(&self) -> &str {
        &self.inner.dependency
    }

    /// Current health.
    pub fn current(&self) -> Health {
        self.inner.lock().health
    }

    /// Whether a liveness timer is currently armed.
    pub fn liveness_armed(&self) -> bool {
        self.inner.lock().liveness.is_some()
    }

    /// Register a listener for every subsequent transition.
    pub fn subscribe(&self, listener: HealthListener) {
        self.inner.lock().listeners.push(listener);
    }

    /// Enter Good from NotInitialized or Bad. Returns false if the transition was not taken.
    pub fn mark_good(&self) -> bool {
        let mut state = self.inner.lock();
        match state.health {
            Health::NotInitialized | Health::Bad => {
                cancel_liveness(&mut state);
                self.inner.transition(&mut state, Health::Good);
                true
            }
            _ => false,
        }
    }

    /// Enter Bad from Good and arm the liveness timer.
    ///
    /// Returns true only on the Good → Bad edge, which is the single place a reconnect may start.
    pub fn mark_bad(&self, max_reconnect: Duration) -> bool {
        let mut state = self.inner.lock();
        if state.health != Health::Good {
            return false;
        }

        self.inner.transition(&mut state, Health::Bad);
        cancel_liveness(&mut state);

        state.next_timer_id += 1;
        let id = state.next_timer_id;
        let weak: Weak<TrackerInner> = Arc::downgrade(&self.inner);
        let deadline = tokio::time::Instant::now() + max_reconnect;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                inner.escalate(id, max_reconnect);
            }
        });
        state.liveness = Some(LivenessTimer { id, handle });
        true
    }

    /// Enter Stopped unless already terminal. Cancels any liveness timer.
    pub fn mark_stopped(&self) -> bool {
        let mut state = self.inner.lock();
        cancel_liveness(&mut state);
        if state.health.is_terminal() {
            return false;
        }
        self.inner.transition(&mut state, Health::Stopped);
        true
    }
}

impl fmt::Debug for HealthTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("HealthTracker")
            .field("dependency", &self.inner.dependency)
            .field("health", &state.health)
            .field("liveness_armed", &state.liveness.is_some())
            .finish()
    }
}

impl TrackerInner {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn escalate(&self, timer_id: u64, max_reconnect: Duration) {
        let mut state = self.lock();
        let armed = state.liveness.as_ref().map(|t| t.id) == Some(timer_id);
        if !armed || state.health != Health::Bad {
            return;
        }
        state.liveness = None;

        tracing::error!(
            dependency = %self.dependency,
            max_reconnect_ms = max_reconnect.as_millis() as u64,
            "Dependency did not recover within its liveness window"
        );
        self.transition(&mut state, Health::Critical);
    }

    fn transition(&self, state: &mut TrackerState, next: Health) {
        let previous = state.health;
        if previous == next {
            return;
        }
        state.health = next;

        match next {
            Health::Bad => tracing::warn!(dependency = %self.dependency, from = %previous, "Dependency health is BAD"),
            Health::Critical => tracing::error!(dependency = %self.dependency, from = %previous, "Dependency health is CRITICAL"),
            _ => tracing::info!(dependency = %self.dependency, from = %previous, to = %next, "Dependency health changed"),
        }
        metrics::record_health_transition(&self.dependency, next);

        for listener in &state.listeners {
            listener(next);
        }
    }
}

fn cancel_liveness(state: &mut TrackerState) {
    if let Some(timer) = state.liveness.take() {
        timer.handle.abort();
    }
}
