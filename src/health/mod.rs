//! Health tracking subsystem.
//!
//! # Data Flow
//! ```text
//! Dependency client observes connect / disconnect / error
//!     → state.rs (HealthTracker transition)
//!     → listeners (the Registry's forwarder)
//!     → Registry health map, escalation on CRITICAL
//!
//! Entering BAD:
//!     → liveness timer armed (per-dependency max reconnect duration)
//!     → leaving BAD cancels it; firing it is the only path to CRITICAL
//! ```
//!
//! # Design Decisions
//! - One tracker per dependency; the dependency owns it exclusively
//! - Intermediate reconnect attempts are invisible to the state machine

pub mod state;

pub use state::{Health, HealthListener, HealthTracker};
