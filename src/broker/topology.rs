//! Queue and dead-letter topology.
//!
//! # Responsibilities
//! - Build the declaration arguments every queue shares on both publish and consume sides
//! - Declare the dead-letter exchange, its queue, and the catch-all binding
//!
//! # Design Decisions
//! - Both sides derive arguments from the same config, so whichever declares first wins
//!   with an identical definition
//! - TTL is per queue; the dead-letter routing key is shared

use std::time::Duration;

use crate::broker::transport::BrokerChannel;
use crate::broker::types::BrokerResult;
use crate::config::BrokerConfig;

/// Arguments used to declare a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueArguments {
    pub durable: bool,
    /// `x-queue-type`
    pub queue_type: Option<String>,
    /// `x-dead-letter-exchange`
    pub dead_letter_exchange: Option<String>,
    /// `x-dead-letter-routing-key`
    pub dead_letter_routing_key: Option<String>,
    /// `x-message-ttl`
    pub message_ttl: Option<Duration>,
}

impl QueueArguments {
    /// Arguments for an application queue: durable, dead-lettered, with its TTL.
    pub fn for_queue(config: &BrokerConfig, queue: &str) -> Self {
        Self {
            durable: true,
            queue_type: config.queue_type.clone(),
            dead_letter_exchange: Some(config.dead_letter.exchange.clone()),
            dead_letter_routing_key: Some(config.dead_letter.routing_key.clone()),
            message_ttl: Some(config.message_ttl(queue)),
        }
    }

    /// Arguments for the dead-letter queue itself: durable, never dead-lettered, no TTL.
    pub fn for_dead_letter_queue(config: &BrokerConfig) -> Self {
        Self {
            durable: true,
            queue_type: config.queue_type.clone(),
            dead_letter_exchange: None,
            dead_letter_routing_key: None,
            message_ttl: None,
        }
    }
}

/// Declare the dead-letter exchange, queue and catch-all binding on `channel`.
pub async fn declare_dead_letter(channel: &dyn BrokerChannel, config: &BrokerConfig) -> BrokerResult<()> {
    let dlx = &config.dead_letter;
    channel.declare_exchange(&dlx.exchange).await?;
    channel
        .declare_queue(&dlx.queue, &QueueArguments::for_dead_letter_queue(config))
        .await?;
    channel.bind_queue(&dlx.queue, &dlx.exchange, &dlx.routing_key).await?;

    tracing::debug!(
        exchange = %dlx.exchange,
        queue = %dlx.queue,
        routing_key = %dlx.routing_key,
        "Dead-letter topology declared"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;

    #[test]
    fn test_queue_arguments_carry_dead_letter_and_ttl() {
        let config = BrokerConfig {
            queue_type: Some("quorum".into()),
            queues: vec![QueueConfig { name: "emails".into(), message_ttl_ms: 600_000 }],
            ..Default::default()
        };

        let args = QueueArguments::for_queue(&config, "emails");
        assert!(args.durable);
        assert_eq!(args.queue_type.as_deref(), Some("quorum"));
        assert_eq!(args.dead_letter_exchange.as_deref(), Some("depguard.dlx"));
        assert_eq!(args.dead_letter_routing_key.as_deref(), Some("#"));
        assert_eq!(args.message_ttl, Some(Duration::from_secs(600)));

        let other = QueueArguments::for_queue(&config, "reports");
        assert_eq!(other.message_ttl, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_dead_letter_queue_is_not_dead_lettered() {
        let args = QueueArguments::for_dead_letter_queue(&BrokerConfig::default());
        assert!(args.durable);
        assert!(args.dead_letter_exchange.is_none());
        assert!(args.message_ttl.is_none());
    }
}
