//! Message broker subsystem.
//!
//! # Data Flow
//! ```text
//! publish(queue, payload)
//!     → client.rs (health gate, declare-once, publish)
//!     → on failure: buffer.rs (TTL-bounded replay buffer)
//!
//! connection event
//!     → client.rs (BAD, teardown, background reconnect)
//!     → transport.rs seam → amqp.rs (lapin)
//!
//! subscribe(queue, max_unacked, handler)
//!     → dedicated channel with prefetch → ack / nack-without-requeue
//!     → topology.rs (dead-letter exchange + queue)
//! ```

pub mod amqp;
pub mod buffer;
pub mod client;
pub mod topology;
pub mod transport;
pub mod types;

pub use amqp::AmqpConnector;
pub use client::BrokerClient;
pub use topology::QueueArguments;
pub use transport::{BrokerChannel, BrokerConnection, BrokerConnector, Delivery, DeliveryStream};
pub use types::{BrokerError, BrokerResult, ConnectionEvent, HandlerError, MessageHandler, PublishOutcome};
