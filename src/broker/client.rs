//! Resilient message broker client.
//!
//! # Responsibilities
//! - Own one connection, one publish channel, and one channel per consumed queue
//! - Declare the dead-letter topology on every new connection
//! - Detect connection loss, drive the reconnect protocol, report health
//! - Buffer at-risk publishes and replay them after reconnecting
//!
//! # Reconnect Protocol
//! ```text
//! connection close/error event
//!     → health BAD (liveness timer armed)
//!     → tear down channels + connection (errors logged, buffer cleared)
//!     → background connect with the reconnect budget
//!         → success: GOOD, restore consumers, replay live buffered messages
//!         → exhaustion: stay BAD until the liveness timer decides
//! ```
//!
//! # Design Decisions
//! - Publishing never touches the network unless health is GOOD and a channel exists
//! - A queue is declared at most once per connection; the set dies with the connection
//! - Failed deliveries are rejected without requeue so they land in the dead-letter queue
//! - Session install and the GOOD transition happen under one lock, so a concurrent
//!   `disconnect()` always wins and late connections are closed

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::broker::buffer::{BufferedMessage, OutboundBuffer};
use crate::broker::topology::{declare_dead_letter, QueueArguments};
use crate::broker::transport::{BrokerChannel, BrokerConnection, BrokerConnector, DeliveryStream};
use crate::broker::types::{BrokerError, BrokerResult, ConnectionEvent, MessageHandler, PublishOutcome};
use crate::config::BrokerConfig;
use crate::health::{Health, HealthListener, HealthTracker};
use crate::observability::metrics;
use crate::resilience::{retry_with_hook, RetryPolicy};

/// Expiry used when `now + ttl` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectMode {
    Initial,
    Reconnect,
}

/// Broker client implementing the managed-dependency lifecycle.
///
/// Cheap to clone; clones share the same connection and state.
#[derive(Clone)]
pub struct BrokerClient {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    name: String,
    config: BrokerConfig,
    connector: Arc<dyn BrokerConnector>,
    health: HealthTracker,
    max_reconnect: Duration,
    session: Mutex<Option<Session>>,
    buffer: Mutex<OutboundBuffer>,
    subscriptions: Mutex<Vec<Subscription>>,
    next_session_id: AtomicU64,
}

/// Everything tied to one connection's lifetime.
struct Session {
    id: u64,
    connection: Arc<dyn BrokerConnection>,
    publish_channel: Arc<dyn BrokerChannel>,
    declared_queues: HashSet<String>,
    subscribers: HashMap<String, SubscriberChannel>,
    watcher: JoinHandle<()>,
}

struct SubscriberChannel {
    channel: Arc<dyn BrokerChannel>,
    consumers: Vec<JoinHandle<()>>,
}

#[derive(Clone)]
struct Subscription {
    queue: String,
    max_unacked: u16,
    handler: Arc<dyn MessageHandler>,
}

impl BrokerClient {
    /// Create a disconnected client.
    ///
    /// # Arguments
    /// * `name` - Dependency name used in logs and metrics
    /// * `config` - Broker configuration (topology, retry budgets, buffer capacity)
    /// * `max_reconnect` - Liveness window before BAD escalates to CRITICAL
    /// * `connector` - Transport used to open connections
    pub fn new(
        name: impl Into<String>,
        config: BrokerConfig,
        max_reconnect: Duration,
        connector: Arc<dyn BrokerConnector>,
    ) -> Self {
        let name = name.into();
        let buffer = OutboundBuffer::new(config.buffer_capacity);
        Self {
            inner: Arc::new(BrokerInner {
                health: HealthTracker::new(name.clone()),
                name,
                config,
                connector,
                max_reconnect,
                session: Mutex::new(None),
                buffer: Mutex::new(buffer),
                subscriptions: Mutex::new(Vec::new()),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn health(&self) -> Health {
        self.inner.health.current()
    }

    /// Register a health listener.
    pub fn on_health_change(&self, listener: HealthListener) -> &Self {
        self.inner.health.subscribe(listener);
        self
    }

    /// Whether a connection and publish channel are currently held.
    pub fn is_connected(&self) -> bool {
        lock(&self.inner.session).is_some()
    }

    /// Messages waiting for replay.
    pub fn buffered_messages(&self) -> usize {
        lock(&self.inner.buffer).len()
    }

    /// Connect with the initial retry budget. Exhaustion is returned to the caller.
    pub async fn connect(&self) -> BrokerResult<()> {
        let policy = self.inner.config.connect_retry;
        self.inner.connect_with(policy, ConnectMode::Initial).await
    }

    /// Stop the client: health STOPPED, all channels and the connection closed,
    /// buffered messages discarded. Safe to call repeatedly.
    pub async fn disconnect(&self) -> BrokerResult<()> {
        self.inner.health.mark_stopped();
        lock(&self.inner.subscriptions).clear();
        self.inner.reset(true).await
    }

    /// Publish `payload` to `queue`.
    ///
    /// `queue` is the broker-side name; resolve logical names with
    /// [`BrokerConfig::queue_name`] so environment namespacing applies.
    /// Fails without any I/O when there is no channel or health is not GOOD.
    pub async fn publish(&self, queue: &str, payload: &[u8]) -> BrokerResult<()> {
        self.inner.publish(queue, payload).await
    }

    /// Publish, or keep the message for replay for up to `ttl` if the publish fails.
    ///
    /// A `ttl` too large to represent (e.g. `Duration::MAX`) keeps the message until replay.
    pub async fn publish_with_ttl(&self, queue: &str, payload: &[u8], ttl: Duration) -> PublishOutcome {
        match self.inner.publish(queue, payload).await {
            Ok(()) => PublishOutcome::Published,
            Err(_) if self.inner.health.current().is_terminal() => {
                tracing::warn!(dependency = %self.inner.name, queue = %queue, "Broker client stopped, dropping message");
                metrics::record_publish(queue, "dropped");
                PublishOutcome::Dropped
            }
            Err(e) => {
                tracing::debug!(dependency = %self.inner.name, queue = %queue, error = %e, "Buffering message for replay");
                lock(&self.inner.buffer).push(BufferedMessage {
                    queue: queue.to_string(),
                    payload: payload.to_vec(),
                    expires_at: expiry(Instant::now(), ttl),
                });
                metrics::record_publish(queue, "buffered");
                PublishOutcome::Buffered
            }
        }
    }

    /// Consume `queue` on its dedicated channel with at most `max_unacked` deliveries in flight.
    ///
    /// Handler success acks the message; handler failure rejects it without requeue.
    /// The subscription is restored automatically after every reconnect.
    pub async fn subscribe<H: MessageHandler>(&self, queue: &str, max_unacked: u16, handler: H) -> BrokerResult<()> {
        let subscription = Subscription {
            queue: queue.to_string(),
            max_unacked,
            handler: Arc::new(handler),
        };
        self.inner.attach(&subscription).await?;
        lock(&self.inner.subscriptions).push(subscription);

        tracing::info!(dependency = %self.inner.name, queue = %queue, max_unacked, "Subscribed");
        Ok(())
    }
}

impl fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerClient")
            .field("name", &self.inner.name)
            .field("host", &self.inner.config.host)
            .field("health", &self.inner.health.current())
            .finish()
    }
}

impl BrokerInner {
    async fn connect_with(self: &Arc<Self>, policy: RetryPolicy, mode: ConnectMode) -> BrokerResult<()> {
        if self.health.current().is_terminal() {
            return Err(BrokerError::Stopped);
        }
        if mode == ConnectMode::Initial && lock(&self.session).is_some() {
            tracing::debug!(dependency = %self.name, "Broker already connected");
            return Ok(());
        }

        let name = self.name.clone();
        let result = retry_with_hook(
            policy,
            || self.open_session(),
            |attempt| {
                tracing::warn!(
                    dependency = %name,
                    attempt = attempt.attempt,
                    remaining = attempt.remaining,
                    delay_ms = attempt.delay.as_millis() as u64,
                    reconnect = mode == ConnectMode::Reconnect,
                    error = %attempt.error,
                    "Broker connect attempt failed, retrying"
                );
            },
        )
        .await;

        match result {
            Ok(session) => self.install(session, mode).await,
            Err(e) if mode == ConnectMode::Initial => {
                tracing::error!(dependency = %self.name, error = %e, "Broker connect failed");
                Err(BrokerError::ConnectFailed {
                    attempts: policy.max_attempts(),
                    message: e.to_string(),
                })
            }
            Err(e) => {
                tracing::error!(
                    dependency = %self.name,
                    error = %e,
                    health = %self.health.current(),
                    "Broker reconnect cycle exhausted, waiting on liveness window"
                );
                Ok(())
            }
        }
    }

    async fn open_session(self: &Arc<Self>) -> BrokerResult<Session> {
        if self.health.current().is_terminal() {
            return Err(BrokerError::Stopped);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection = match self.connector.connect(events_tx).await {
            Ok(connection) => connection,
            Err(e) => {
                metrics::record_connect_attempt(&self.name, false);
                return Err(e);
            }
        };

        let publish_channel = match self.prepare_publish_channel(connection.as_ref()).await {
            Ok(channel) => channel,
            Err(e) => {
                metrics::record_connect_attempt(&self.name, false);
                if let Err(close_err) = connection.close().await {
                    tracing::debug!(dependency = %self.name, error = %close_err, "Failed to close half-open connection");
                }
                return Err(e);
            }
        };
        metrics::record_connect_attempt(&self.name, true);

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        Ok(Session {
            id,
            connection,
            publish_channel,
            declared_queues: HashSet::new(),
            subscribers: HashMap::new(),
            watcher: self.spawn_watcher(id, events_rx),
        })
    }

    async fn prepare_publish_channel(&self, connection: &dyn BrokerConnection) -> BrokerResult<Arc<dyn BrokerChannel>> {
        let channel = connection.open_channel().await?;
        channel.enable_publisher_confirms().await?;
        declare_dead_letter(channel.as_ref(), &self.config).await?;
        Ok(channel)
    }

    fn spawn_watcher(self: &Arc<Self>, session_id: u64, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let Some(event) = events.recv().await else {
                return;
            };
            if let Some(inner) = weak.upgrade() {
                // Handled on its own task: teardown aborts this watcher.
                tokio::spawn(async move { inner.handle_connection_loss(session_id, event).await });
            }
        })
    }

    async fn install(self: &Arc<Self>, session: Session, mode: ConnectMode) -> BrokerResult<()> {
        let leftover = {
            let mut slot = lock(&self.session);
            if self.health.current().is_terminal() || slot.is_some() {
                Some(session)
            } else {
                *slot = Some(session);
                self.health.mark_good();
                None
            }
        };

        if let Some(session) = leftover {
            tracing::info!(dependency = %self.name, health = %self.health.current(), "Discarding connection that completed after stop or a concurrent connect");
            let _ = self.close_session(session, false).await;
            return if self.health.current().is_terminal() && mode == ConnectMode::Initial {
                Err(BrokerError::Stopped)
            } else {
                Ok(())
            };
        }

        tracing::info!(dependency = %self.name, reconnect = mode == ConnectMode::Reconnect, "Broker connected");
        self.restore_subscriptions().await;
        self.replay_buffer().await;
        Ok(())
    }

    async fn handle_connection_loss(self: Arc<Self>, session_id: u64, event: ConnectionEvent) {
        let (entered_bad, session) = {
            let mut slot = lock(&self.session);
            if slot.as_ref().map(|s| s.id) != Some(session_id) {
                tracing::debug!(dependency = %self.name, "Ignoring event from a retired connection");
                return;
            }
            let entered_bad = self.health.mark_bad(self.max_reconnect);
            (entered_bad, slot.take())
        };

        tracing::warn!(dependency = %self.name, reason = %event.reason(), "Broker connection lost");
        let cleared = lock(&self.buffer).clear();
        if cleared > 0 {
            tracing::warn!(dependency = %self.name, cleared, "Discarded buffered messages on connection reset");
        }
        if let Some(session) = session {
            let _ = self.close_session(session, false).await;
        }

        if entered_bad {
            tokio::spawn(self.clone().reconnect());
        }
    }

    // Boxed to break the connect -> watcher -> reconnect future type cycle.
    fn reconnect(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let policy = self.config.reconnect_retry;
            let _ = self.connect_with(policy, ConnectMode::Reconnect).await;
        })
    }

    /// Drop the current session and the buffer. `loud` returns close failures.
    async fn reset(&self, loud: bool) -> BrokerResult<()> {
        let session = lock(&self.session).take();
        let cleared = lock(&self.buffer).clear();

        match session {
            Some(session) => {
                let result = self.close_session(session, loud).await;
                tracing::info!(dependency = %self.name, discarded_messages = cleared, "Broker disconnected");
                result
            }
            None => Ok(()),
        }
    }

    async fn close_session(&self, session: Session, loud: bool) -> BrokerResult<()> {
        session.watcher.abort();

        for (queue, subscriber) in session.subscribers {
            for consumer in subscriber.consumers {
                consumer.abort();
            }
            if let Err(e) = subscriber.channel.close().await {
                tracing::warn!(dependency = %self.name, queue = %queue, error = %e, "Failed to close subscriber channel");
            }
        }

        let mut first_error = None;
        if let Err(e) = session.publish_channel.close().await {
            tracing::warn!(dependency = %self.name, error = %e, "Failed to close publish channel");
            first_error.get_or_insert(e);
        }
        if let Err(e) = session.connection.close().await {
            tracing::warn!(dependency = %self.name, error = %e, "Failed to close connection");
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) if loud => Err(e),
            _ => Ok(()),
        }
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> BrokerResult<()> {
        let result = self.try_publish(queue, payload).await;
        match &result {
            Ok(()) => metrics::record_publish(queue, "published"),
            Err(e) => {
                tracing::debug!(dependency = %self.name, queue = %queue, error = %e, "Publish failed");
                metrics::record_publish(queue, "failed");
            }
        }
        result
    }

    async fn try_publish(&self, queue: &str, payload: &[u8]) -> BrokerResult<()> {
        let (session_id, channel, needs_declare) = {
            let slot = lock(&self.session);
            let session = slot.as_ref().ok_or(BrokerError::NotConnected)?;
            let health = self.health.current();
            if health != Health::Good {
                return Err(BrokerError::Unhealthy(health));
            }
            (
                session.id,
                session.publish_channel.clone(),
                !session.declared_queues.contains(queue),
            )
        };

        if needs_declare {
            channel
                .declare_queue(queue, &QueueArguments::for_queue(&self.config, queue))
                .await?;
            if let Some(session) = lock(&self.session).as_mut().filter(|s| s.id == session_id) {
                session.declared_queues.insert(queue.to_string());
            }
        }

        channel.publish(queue, payload).await
    }

    async fn attach(&self, subscription: &Subscription) -> BrokerResult<()> {
        let queue = subscription.queue.as_str();
        let (session_id, connection, existing) = {
            let slot = lock(&self.session);
            let session = slot.as_ref().ok_or(BrokerError::NotConnected)?;
            let health = self.health.current();
            if health != Health::Good {
                return Err(BrokerError::Unhealthy(health));
            }
            (
                session.id,
                session.connection.clone(),
                session.subscribers.get(queue).map(|s| s.channel.clone()),
            )
        };

        let (channel, fresh) = match existing {
            Some(channel) => (channel, false),
            None => {
                let channel = connection.open_channel().await?;
                if let Err(e) = channel.set_prefetch(subscription.max_unacked).await {
                    let _ = channel.close().await;
                    return Err(e);
                }
                (channel, true)
            }
        };

        let stream = match self.start_consumer(channel.as_ref(), queue).await {
            Ok(stream) => stream,
            Err(e) => {
                if fresh {
                    let _ = channel.close().await;
                }
                return Err(e);
            }
        };
        let consumer = spawn_dispatcher(queue.to_string(), subscription.handler.clone(), stream);

        let registered = {
            let mut slot = lock(&self.session);
            match slot.as_mut().filter(|s| s.id == session_id) {
                Some(session) => {
                    session
                        .subscribers
                        .entry(queue.to_string())
                        .or_insert_with(|| SubscriberChannel {
                            channel: channel.clone(),
                            consumers: Vec::new(),
                        })
                        .consumers
                        .push(consumer);
                    true
                }
                None => {
                    consumer.abort();
                    false
                }
            }
        };

        if registered {
            Ok(())
        } else {
            let _ = channel.close().await;
            Err(BrokerError::NotConnected)
        }
    }

    async fn start_consumer(&self, channel: &dyn BrokerChannel, queue: &str) -> BrokerResult<DeliveryStream> {
        channel
            .declare_queue(queue, &QueueArguments::for_queue(&self.config, queue))
            .await?;
        let consumer_tag = format!("{}-{}", queue, Uuid::new_v4());
        channel.consume(queue, &consumer_tag).await
    }

    async fn restore_subscriptions(&self) {
        let subscriptions = lock(&self.subscriptions).clone();
        for subscription in &subscriptions {
            match self.attach(subscription).await {
                Ok(()) => tracing::info!(dependency = %self.name, queue = %subscription.queue, "Consumer restored"),
                Err(e) => tracing::error!(dependency = %self.name, queue = %subscription.queue, error = %e, "Failed to restore consumer"),
            }
        }
    }

    async fn replay_buffer(&self) {
        let messages = lock(&self.buffer).drain_live(Instant::now());
        if messages.is_empty() {
            return;
        }

        let total = messages.len();
        let mut replayed = 0usize;
        for message in messages {
            match self.publish(&message.queue, &message.payload).await {
                Ok(()) => replayed += 1,
                Err(_) => lock(&self.buffer).push(message),
            }
        }
        tracing::info!(dependency = %self.name, replayed, total, "Replayed buffered messages");
    }
}

fn spawn_dispatcher(queue: String, handler: Arc<dyn MessageHandler>, mut deliveries: DeliveryStream) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(next) = deliveries.next().await {
            let delivery = match next {
                Ok(delivery) => delivery,
                Err(e) => {
                    tracing::warn!(queue = %queue, error = %e, "Consumer stream failed");
                    break;
                }
            };

            match handler.handle(delivery.payload()).await {
                Ok(()) => {
                    if let Err(e) = delivery.ack().await {
                        tracing::warn!(queue = %queue, error = %e, "Failed to ack message");
                    }
                    metrics::record_delivery(&queue, true);
                }
                Err(e) => {
                    tracing::warn!(queue = %queue, error = %e, "Handler failed, dead-lettering message");
                    if let Err(e) = delivery.nack(false).await {
                        tracing::warn!(queue = %queue, error = %e, "Failed to nack message");
                    }
                    metrics::record_delivery(&queue, false);
                }
            }
        }
        tracing::debug!(queue = %queue, "Consumer stream ended");
    })
}

fn expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl).unwrap_or_else(|| now + FAR_FUTURE)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_saturates_instead_of_overflowing() {
        let now = Instant::now();
        assert_eq!(expiry(now, Duration::from_secs(60)), now + Duration::from_secs(60));
        assert_eq!(expiry(now, Duration::MAX), now + FAR_FUTURE);
    }
}
