//! Dependency registry subsystem.
//!
//! # Data Flow
//! ```text
//! register(dependency, name)      (before connect_all only)
//!     → health listener enqueues (name, health)
//!
//! connect_all()
//!     → concurrent connect → aggregate error if any initial connect failed
//!
//! (name, CRITICAL)
//!     → disconnect_all() → JSON failure report → Shutdown(Critical)
//! ```

pub mod dependency;
#[allow(clippy::module_inception)]
pub mod registry;

pub use dependency::{Dependency, DependencyError, DependencyKind, ManagedDependency};
pub use registry::{
    ConnectSummary, DependencyHealth, DisconnectSummary, FailedDependency, HealthSummary, Registry, RegistryError,
};
