//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Connect attempt against a dependency:
//!     → backoff.rs (retry with exponential delay)
//!     → success: caller marks the dependency GOOD
//!     → exhaustion: initial connect fails loudly, reconnect cycles give up quietly
//! ```
//!
//! # Design Decisions
//! - Retrying is a plain async function, not middleware: every caller owns its own budget
//! - Sleeps go through Tokio's timer so paused-time tests control them

pub mod backoff;

pub use backoff::{retry, retry_with_hook, RetryAttempt, RetryPolicy};
