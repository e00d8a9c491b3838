//! Document-store subsystem.
//!
//! # Data Flow
//! ```text
//! connect()
//!     → client.rs (retry budget) → driver.rs seam → mongo.rs (ping)
//!
//! driver heartbeat edge (Connected / Disconnected)
//!     → client.rs → health GOOD / BAD (liveness timer)
//! ```

pub mod client;
pub mod driver;
pub mod mongo;

pub use client::DocStoreClient;
pub use driver::{DocStoreError, DocumentDriver, DriverEvent};
pub use mongo::MongoDriver;
