//! Broker types and error definitions.

use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Wire-level failure reported by the transport.
    #[error("Broker transport error: {0}")]
    Transport(String),

    /// No live connection or publish channel.
    #[error("Broker is not connected")]
    NotConnected,

    /// Connected, but health is not GOOD; no I/O is attempted.
    #[error("Broker is unhealthy ({0})")]
    Unhealthy(crate::health::Health),

    /// The client was stopped or escalated; it will not connect again.
    #[error("Broker client is stopped")]
    Stopped,

    /// Initial connect exhausted its retry budget.
    #[error("Failed to connect to broker after {attempts} attempts: {message}")]
    ConnectFailed { attempts: u32, message: String },

    /// Failed to build the connection URI.
    #[error("Invalid broker URI: {0}")]
    InvalidUri(String),
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Connection-level events that start the reconnect protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The broker closed the connection (e.g. `connection.close` with an error code).
    Closed(String),
    /// Socket, heartbeat or other transport failure.
    Error(String),
}

impl ConnectionEvent {
    pub fn reason(&self) -> &str {
        match self {
            ConnectionEvent::Closed(reason) | ConnectionEvent::Error(reason) => reason,
        }
    }
}

/// Result of a publish that may fall back to the replay buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// Held for replay after the next successful connect.
    Buffered,
    /// The client is stopped or critical; nothing will replay it.
    Dropped,
}

/// Error a message handler reports; the message is dead-lettered.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processes one consumed message.
///
/// Returning `Ok` acknowledges the message; returning `Err` rejects it without requeue,
/// which routes it to the dead-letter queue.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError> {
        (self)(payload.to_vec()).await
    }
}
