//! Document-store driver seam.
//!
//! A driver owns its own reconnection. The client only asks it to connect once,
//! listens to its connectivity events, and closes it.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors that can occur during document-store operations.
#[derive(Debug, Error)]
pub enum DocStoreError {
    #[error("Document store driver error: {0}")]
    Driver(String),

    /// Initial connect exhausted its retry budget.
    #[error("Failed to connect to document store after {attempts} attempts: {message}")]
    ConnectFailed { attempts: u32, message: String },

    #[error("Document store client is stopped")]
    Stopped,

    #[error("Invalid document store URI: {0}")]
    InvalidUri(String),
}

/// Connectivity changes observed by the driver after the first connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverEvent {
    Connected,
    Disconnected,
}

#[async_trait]
pub trait DocumentDriver: Send + Sync + 'static {
    /// Subscribe to connectivity events.
    fn events(&self) -> broadcast::Receiver<DriverEvent>;

    /// Establish the first connection; the driver reconnects on its own afterwards.
    async fn connect(&self) -> Result<(), DocStoreError>;

    async fn close(&self) -> Result<(), DocStoreError>;
}
