//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Init logging/metrics → Register dependencies → connect_all
//!
//! Shutdown:
//!     signals.rs: SIGTERM/SIGINT → disconnect_all → exit 0
//!     shutdown.rs: registry saw CRITICAL → disconnect_all → Shutdown::trigger → exit 1
//! ```
//!
//! # Design Decisions
//! - Startup failure is fatal: a dependency that never connects stops the process
//! - The registry never exits the process itself; it only raises the shutdown signal

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownReason};
pub use signals::wait_for_signal;
