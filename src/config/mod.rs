//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML), optional
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (environment overrides: APP_ENV, BROKER_*, DOCSTORE_*)
//!     → validation.rs (semantic checks)
//!     → environment namespacing of queue / dead-letter names
//!     → AppConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{apply_env_overrides, from_env, load_config, ConfigError};
pub use schema::{
    AppConfig, AppSection, BrokerConfig, DeadLetterConfig, DocStoreConfig, Environment, LivenessConfig,
    LivenessLimit, LogFormat, ObservabilityConfig, QueueConfig,
};
