//! Shutdown coordination for the process.

use std::fmt;

use tokio::sync::broadcast;

/// Why the process is shutting down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// An OS signal (SIGINT / SIGTERM) was received.
    Signal,
    /// A dependency reached CRITICAL and the registry tore everything down.
    Critical { dependency: String },
}

impl ShutdownReason {
    /// Process exit code the owner should use.
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownReason::Signal => 0,
            ShutdownReason::Critical { .. } => 1,
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal => f.write_str("signal received"),
            ShutdownReason::Critical { dependency } => write!(f, "dependency '{}' is CRITICAL", dependency),
        }
    }
}

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that the owning process and long-running tasks subscribe to.
#[derive(Debug, Clone)]
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<ShutdownReason>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(4);
        Self { tx }
    }

    /// Subscribe to the shutdown signal. Subscribe before anything can trigger it.
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self, reason: ShutdownReason) {
        if self.tx.send(reason.clone()).is_err() {
            tracing::warn!(reason = %reason, "Shutdown triggered with no subscribers");
        }
    }

    /// Get the number of active subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_every_subscriber() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.subscribe();
        let mut b = shutdown.clone().subscribe();
        assert_eq!(shutdown.receiver_count(), 2);

        shutdown.trigger(ShutdownReason::Critical { dependency: "broker".into() });

        let reason = a.recv().await.unwrap();
        assert_eq!(reason.exit_code(), 1);
        assert_eq!(b.recv().await.unwrap(), reason);
        assert_eq!(reason.to_string(), "dependency 'broker' is CRITICAL");
    }
}
