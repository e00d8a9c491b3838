//! Resilient dependency layer for a message broker and a document store.

pub mod broker;
pub mod config;
pub mod docstore;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod registry;
pub mod resilience;

pub use broker::BrokerClient;
pub use config::AppConfig;
pub use docstore::DocStoreClient;
pub use health::Health;
pub use lifecycle::{Shutdown, ShutdownReason};
pub use registry::Registry;
