//! AMQP 0-9-1 transport over `lapin`.
//!
//! # Responsibilities
//! - Open connections with a bounded connect timeout
//! - Forward connection errors to the client's event channel
//! - Translate queue arguments into AMQP field tables
//! - Publish persistent messages and wait for the broker confirm
//!
//! # Connection Events
//! `lapin` has no separate close callback: a broker-initiated `connection.close` and a lost
//! socket or heartbeat both arrive through `on_error`. Protocol closes are forwarded as
//! [`ConnectionEvent::Closed`], everything else as [`ConnectionEvent::Error`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable, LongString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::broker::topology::QueueArguments;
use crate::broker::transport::{BrokerChannel, BrokerConnection, BrokerConnector, Delivery, DeliveryStream};
use crate::broker::types::{BrokerError, BrokerResult, ConnectionEvent};
use crate::config::{BrokerConfig, Environment};

const PERSISTENT: u8 = 2;
const REPLY_SUCCESS: u16 = 200;

impl From<lapin::Error> for BrokerError {
    fn from(err: lapin::Error) -> Self {
        BrokerError::Transport(err.to_string())
    }
}

/// Connector for a single AMQP endpoint.
#[derive(Clone)]
pub struct AmqpConnector {
    uri: String,
    connect_timeout: Duration,
}

impl AmqpConnector {
    /// Build a connector from configuration; `amqps` is used outside local environments.
    pub fn new(config: &BrokerConfig, environment: Environment) -> BrokerResult<Self> {
        let uri = config
            .uri(environment)
            .map_err(|e| BrokerError::InvalidUri(e.to_string()))?;

        Ok(Self {
            uri: uri.to_string(),
            connect_timeout: Duration::from_millis(config.connection_timeout_ms),
        })
    }
}

impl std::fmt::Debug for AmqpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The URI carries credentials.
        f.debug_struct("AmqpConnector")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(&self, events: mpsc::UnboundedSender<ConnectionEvent>) -> BrokerResult<Arc<dyn BrokerConnection>> {
        let connection = timeout(
            self.connect_timeout,
            Connection::connect(&self.uri, ConnectionProperties::default()),
        )
        .await
        .map_err(|_| BrokerError::Transport(format!("connect timed out after {:?}", self.connect_timeout)))??;

        connection.on_error(move |err| {
            let _ = events.send(connection_event(&err));
        });

        Ok(Arc::new(AmqpConnection { connection }))
    }
}

fn connection_event(err: &lapin::Error) -> ConnectionEvent {
    match err {
        lapin::Error::ProtocolError(_) => ConnectionEvent::Closed(err.to_string()),
        _ => ConnectionEvent::Error(err.to_string()),
    }
}

struct AmqpConnection {
    connection: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn open_channel(&self) -> BrokerResult<Arc<dyn BrokerChannel>> {
        let channel = self.connection.create_channel().await?;
        Ok(Arc::new(AmqpChannel { channel }))
    }

    async fn close(&self) -> BrokerResult<()> {
        if !self.connection.status().connected() {
            return Ok(());
        }
        self.connection.close(REPLY_SUCCESS, "client shutdown").await?;
        Ok(())
    }
}

struct AmqpChannel {
    channel: Channel,
}

fn field_table(arguments: &QueueArguments) -> FieldTable {
    let mut table = FieldTable::default();
    if let Some(queue_type) = &arguments.queue_type {
        table.insert("x-queue-type".into(), AMQPValue::LongString(LongString::from(queue_type.as_str())));
    }
    if let Some(exchange) = &arguments.dead_letter_exchange {
        table.insert("x-dead-letter-exchange".into(), AMQPValue::LongString(LongString::from(exchange.as_str())));
    }
    if let Some(routing_key) = &arguments.dead_letter_routing_key {
        table.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(LongString::from(routing_key.as_str())),
        );
    }
    if let Some(ttl) = arguments.message_ttl {
        table.insert("x-message-ttl".into(), AMQPValue::LongLongInt(ttl.as_millis() as i64));
    }
    table
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(&self, name: &str) -> BrokerResult<()> {
        self.channel
            .exchange_declare(
                name,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn declare_queue(&self, name: &str, arguments: &QueueArguments) -> BrokerResult<()> {
        self.channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: arguments.durable,
                    ..Default::default()
                },
                field_table(arguments),
            )
            .await?;
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> BrokerResult<()> {
        self.channel
            .queue_bind(queue, exchange, routing_key, QueueBindOptions::default(), FieldTable::default())
            .await?;
        Ok(())
    }

    async fn enable_publisher_confirms(&self) -> BrokerResult<()> {
        self.channel.confirm_select(ConfirmSelectOptions::default()).await?;
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> BrokerResult<()> {
        let confirmation = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(PERSISTENT),
            )
            .await?
            .await?;

        match confirmation {
            Confirmation::Nack(_) => Err(BrokerError::Transport(format!("broker rejected publish to {}", queue))),
            Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
        }
    }

    async fn set_prefetch(&self, count: u16) -> BrokerResult<()> {
        self.channel.basic_qos(count, BasicQosOptions::default()).await?;
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> BrokerResult<DeliveryStream> {
        let consumer = self
            .channel
            .basic_consume(queue, consumer_tag, BasicConsumeOptions::default(), FieldTable::default())
            .await?;

        let stream = consumer.map(|next| {
            next.map(|delivery| Box::new(AmqpDelivery { delivery }) as Box<dyn Delivery>)
                .map_err(BrokerError::from)
        });
        Ok(Box::pin(stream))
    }

    async fn close(&self) -> BrokerResult<()> {
        if !self.channel.status().connected() {
            return Ok(());
        }
        self.channel.close(REPLY_SUCCESS, "client shutdown").await?;
        Ok(())
    }
}

struct AmqpDelivery {
    delivery: lapin::message::Delivery,
}

#[async_trait]
impl Delivery for AmqpDelivery {
    fn payload(&self) -> &[u8] {
        &self.delivery.data
    }

    async fn ack(&self) -> BrokerResult<()> {
        self.delivery.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> BrokerResult<()> {
        self.delivery
            .acker
            .nack(BasicNackOptions {
                requeue,
                multiple: false,
            })
            .await?;
        Ok(())
    }
}
