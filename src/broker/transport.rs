//! Broker transport seam.
//!
//! The client drives connections, channels and deliveries only through these traits.
//! `amqp.rs` implements them over `lapin`; tests implement them in memory.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;
use tokio::sync::mpsc;

use crate::broker::topology::QueueArguments;
use crate::broker::types::{BrokerResult, ConnectionEvent};

/// Stream of deliveries from one consumer.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = BrokerResult<Box<dyn Delivery>>> + Send>>;

/// Opens connections to a broker endpoint.
#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    /// Open a connection; connection-level close/error events go to `events`.
    async fn connect(&self, events: mpsc::UnboundedSender<ConnectionEvent>) -> BrokerResult<Arc<dyn BrokerConnection>>;
}

/// One live broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn open_channel(&self) -> BrokerResult<Arc<dyn BrokerChannel>>;
    async fn close(&self) -> BrokerResult<()>;
}

/// One channel on a connection.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare a durable direct exchange.
    async fn declare_exchange(&self, name: &str) -> BrokerResult<()>;
    async fn declare_queue(&self, name: &str, arguments: &QueueArguments) -> BrokerResult<()>;
    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> BrokerResult<()>;
    /// Put the channel in confirm mode so `publish` resolves only once the broker acks.
    async fn enable_publisher_confirms(&self) -> BrokerResult<()>;
    /// Send `payload` to `queue` through the default exchange.
    ///
    /// On a confirm-mode channel, a broker nack is an error.
    async fn publish(&self, queue: &str, payload: &[u8]) -> BrokerResult<()>;
    /// Limit unacknowledged deliveries on this channel.
    async fn set_prefetch(&self, count: u16) -> BrokerResult<()>;
    async fn consume(&self, queue: &str, consumer_tag: &str) -> BrokerResult<DeliveryStream>;
    async fn close(&self) -> BrokerResult<()>;
}

/// A consumed message awaiting acknowledgement.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn payload(&self) -> &[u8];
    async fn ack(&self) -> BrokerResult<()>;
    async fn nack(&self, requeue: bool) -> BrokerResult<()>;
}
