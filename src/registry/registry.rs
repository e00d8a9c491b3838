//! Dependency registry.
//!
//! # Responsibilities
//! - Hold the named set of dependencies, frozen once `connect_all` starts
//! - Fan out connect / disconnect concurrently and aggregate the outcomes
//! - Track the last reported health of every dependency
//! - Escalate the first CRITICAL report into a full, orderly shutdown
//!
//! # Design Decisions
//! - Health listeners only enqueue `(name, health)`; one task consumes the queue,
//!   so escalation never runs inside a dependency's lock
//! - Escalation happens at most once per registry, however many dependencies go CRITICAL
//! - A partial startup failure does not roll back the dependencies that connected

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::broker::BrokerClient;
use crate::docstore::DocStoreClient;
use crate::health::Health;
use crate::lifecycle::{Shutdown, ShutdownReason};
use crate::registry::dependency::{Dependency, DependencyKind, ManagedDependency};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry is already initialized; dependencies can no longer be registered")]
    AlreadyInitialized,

    #[error("Dependency '{0}' is already registered")]
    DuplicateName(String),

    #[error("Dependency '{0}' is not registered")]
    NotRegistered(String),

    #[error("Dependency '{name}' is a {actual}, not a {expected}")]
    WrongKind {
        name: String,
        expected: DependencyKind,
        actual: DependencyKind,
    },

    #[error("{} of {total} dependencies failed to connect: {}", .failed.len(), format_failures(.failed))]
    ConnectFailed { failed: Vec<FailedDependency>, total: usize },
}

fn format_failures(failed: &[FailedDependency]) -> String {
    failed
        .iter()
        .map(|f| format!("{} ({})", f.name, f.message))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A dependency whose connect or disconnect failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDependency {
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectSummary {
    pub connected: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DisconnectSummary {
    pub disconnected: usize,
    pub failed: Vec<FailedDependency>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyHealth {
    pub name: String,
    pub health: Health,
    pub is_healthy: bool,
}

/// Aggregate health, also used as the critical failure report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub unhealthy_count: usize,
    pub details: Vec<DependencyHealth>,
}

#[derive(Debug)]
struct HealthReport {
    name: String,
    health: Health,
}

/// Aggregation point for every managed dependency.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    dependencies: RwLock<BTreeMap<String, Dependency>>,
    initialized: AtomicBool,
    health: DashMap<String, Health>,
    reports_tx: mpsc::UnboundedSender<HealthReport>,
    reports_rx: Mutex<Option<mpsc::UnboundedReceiver<HealthReport>>>,
    shutdown: Shutdown,
    escalated: AtomicBool,
}

impl Registry {
    /// Create an empty registry that signals `shutdown` on critical escalation.
    pub fn new(shutdown: Shutdown) -> Self {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(RegistryInner {
                dependencies: RwLock::new(BTreeMap::new()),
                initialized: AtomicBool::new(false),
                health: DashMap::new(),
                reports_tx,
                reports_rx: Mutex::new(Some(reports_rx)),
                shutdown,
                escalated: AtomicBool::new(false),
            }),
        }
    }

    /// Add a dependency under `name` and subscribe to its health changes.
    pub fn register(&self, dependency: impl Into<Dependency>, name: impl Into<String>) -> Result<(), RegistryError> {
        let dependency = dependency.into();
        let name = name.into();

        let mut dependencies = self.inner.dependencies.write().unwrap_or_else(|p| p.into_inner());
        if self.inner.initialized.load(Ordering::SeqCst) {
            tracing::error!(dependency = %name, "Registration rejected, registry already initialized");
            return Err(RegistryError::AlreadyInitialized);
        }
        if dependencies.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }

        let reports = self.inner.reports_tx.clone();
        let reporter = name.clone();
        dependency.on_health_change(Box::new(move |health| {
            let _ = reports.send(HealthReport {
                name: reporter.clone(),
                health,
            });
        }));

        self.inner.health.insert(name.clone(), dependency.health());
        tracing::debug!(dependency = %name, kind = %dependency.kind(), "Dependency registered");
        dependencies.insert(name, dependency);
        Ok(())
    }

    /// Connect every dependency concurrently.
    ///
    /// Freezes registration. Fails if any initial connect failed; the others stay connected.
    pub async fn connect_all(&self) -> Result<ConnectSummary, RegistryError> {
        let dependencies = {
            let dependencies = self.inner.dependencies.write().unwrap_or_else(|p| p.into_inner());
            if self.inner.initialized.swap(true, Ordering::SeqCst) {
                return Err(RegistryError::AlreadyInitialized);
            }
            dependencies.iter().map(|(n, d)| (n.clone(), d.clone())).collect::<Vec<_>>()
        };
        self.start_escalation_watcher();

        let total = dependencies.len();
        let outcomes = join_all(dependencies.into_iter().map(|(name, dependency)| async move {
            let outcome = dependency.connect().await;
            (name, outcome)
        }))
        .await;

        let mut failed = Vec::new();
        for (name, outcome) in outcomes {
            if let Err(e) = outcome {
                tracing::error!(dependency = %name, error = %e, "Dependency failed to connect");
                failed.push(FailedDependency {
                    name,
                    message: e.to_string(),
                });
            }
        }

        if failed.is_empty() {
            tracing::info!(connected = total, "All dependencies connected");
            Ok(ConnectSummary { connected: total })
        } else {
            tracing::error!(failed = failed.len(), total, "Dependency startup failed");
            Err(RegistryError::ConnectFailed { failed, total })
        }
    }

    /// Disconnect every dependency concurrently. Failures are logged and returned, never raised.
    pub async fn disconnect_all(&self) -> DisconnectSummary {
        let dependencies = self.snapshot();

        let outcomes = join_all(dependencies.into_iter().map(|(name, dependency)| async move {
            let outcome = dependency.disconnect().await;
            (name, outcome)
        }))
        .await;

        let mut summary = DisconnectSummary::default();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(()) => summary.disconnected += 1,
                Err(e) => {
                    tracing::warn!(dependency = %name, error = %e, "Dependency failed to disconnect cleanly");
                    summary.failed.push(FailedDependency {
                        name,
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            disconnected = summary.disconnected,
            failed = summary.failed.len(),
            "Dependencies disconnected"
        );
        summary
    }

    /// Current health of every dependency, in name order.
    ///
    /// Polls each dependency; the reported-health map is left untouched.
    pub fn health_summary(&self) -> HealthSummary {
        let details: Vec<DependencyHealth> = self
            .snapshot()
            .into_iter()
            .map(|(name, dependency)| {
                let health = dependency.health();
                DependencyHealth {
                    name,
                    health,
                    is_healthy: health == Health::Good,
                }
            })
            .collect();

        HealthSummary {
            unhealthy_count: details.iter().filter(|d| !d.is_healthy).count(),
            details,
        }
    }

    /// Last health `name` reported through its health listener.
    pub fn last_reported(&self, name: &str) -> Option<Health> {
        self.inner.health.get(name).map(|h| *h)
    }

    pub fn broker(&self, name: &str) -> Result<BrokerClient, RegistryError> {
        match self.get(name)? {
            Dependency::Broker(client) => Ok(client),
            other => Err(RegistryError::WrongKind {
                name: name.to_string(),
                expected: DependencyKind::Broker,
                actual: other.kind(),
            }),
        }
    }

    pub fn docstore(&self, name: &str) -> Result<DocStoreClient, RegistryError> {
        match self.get(name)? {
            Dependency::DocStore(client) => Ok(client),
            other => Err(RegistryError::WrongKind {
                name: name.to_string(),
                expected: DependencyKind::DocStore,
                actual: other.kind(),
            }),
        }
    }

    /// Whether a CRITICAL report has already triggered shutdown.
    pub fn has_escalated(&self) -> bool {
        self.inner.escalated.load(Ordering::SeqCst)
    }

    fn get(&self, name: &str) -> Result<Dependency, RegistryError> {
        self.inner
            .dependencies
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))
    }

    fn snapshot(&self) -> Vec<(String, Dependency)> {
        self.inner
            .dependencies
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(n, d)| (n.clone(), d.clone()))
            .collect()
    }

    fn start_escalation_watcher(&self) {
        let Some(mut reports) = self.inner.reports_rx.lock().unwrap_or_else(|p| p.into_inner()).take() else {
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(report) = reports.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                Registry { inner }.on_health_report(report).await;
            }
        });
    }

    async fn on_health_report(&self, report: HealthReport) {
        self.inner.health.insert(report.name.clone(), report.health);
        tracing::debug!(dependency = %report.name, health = %report.health, "Health reported");

        if report.health != Health::Critical || self.inner.escalated.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::error!(
            dependency = %report.name,
            "Stopping all dependencies and exiting, dependency is CRITICAL"
        );
        self.disconnect_all().await;

        let summary = self.health_summary();
        match serde_json::to_string(&summary) {
            Ok(json) => tracing::error!(report = %json, unhealthy = summary.unhealthy_count, "Critical failure report"),
            Err(e) => tracing::error!(error = %e, "Failed to serialize critical failure report"),
        }

        self.inner.shutdown.trigger(ShutdownReason::Critical {
            dependency: report.name,
        });
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("dependencies", &self.snapshot().len())
            .field("initialized", &self.inner.initialized.load(Ordering::SeqCst))
            .field("escalated", &self.has_escalated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_failed_names_every_failure() {
        let err = RegistryError::ConnectFailed {
            failed: vec![FailedDependency {
                name: "docstore".into(),
                message: "connection refused".into(),
            }],
            total: 2,
        };
        assert_eq!(
            err.to_string(),
            "1 of 2 dependencies failed to connect: docstore (connection refused)"
        );
    }

    #[test]
    fn test_summary_serializes_health_names() {
        let summary = HealthSummary {
            unhealthy_count: 1,
            details: vec![DependencyHealth {
                name: "broker".into(),
                health: Health::Critical,
                is_healthy: false,
            }],
        };
        let json = serde_json::to_string(&summary).unwrap();
        assert_eq!(
            json,
            r#"{"unhealthy_count":1,"details":[{"name":"broker","health":"CRITICAL","is_healthy":false}]}"#
        );
    }
}
