//! Shared in-memory fakes for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use depguard::broker::{
    BrokerChannel, BrokerConnection, BrokerConnector, BrokerError, BrokerResult, ConnectionEvent, Delivery,
    DeliveryStream, QueueArguments,
};
use depguard::config::BrokerConfig;
use depguard::docstore::{DocStoreError, DocumentDriver, DriverEvent};
use depguard::health::{Health, HealthListener};
use depguard::resilience::RetryPolicy;

/// Observable state of the fake broker.
#[derive(Default)]
pub struct BrokerState {
    pub available: bool,
    pub connect_delay: Duration,
    pub connect_calls: usize,
    pub open_connections: usize,
    pub declares: HashMap<String, usize>,
    pub exchanges: Vec<String>,
    pub bindings: Vec<(String, String, String)>,
    pub published: Vec<(String, Vec<u8>)>,
    pub prefetch: Vec<u16>,
    pub acks: Vec<Vec<u8>>,
    pub nacks: Vec<(Vec<u8>, bool)>,
    pub closed_channels: usize,
    pub confirm_channels: usize,
    consumers: HashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>,
    events: Option<mpsc::UnboundedSender<ConnectionEvent>>,
}

/// In-memory broker. Clones share state.
#[derive(Clone)]
pub struct FakeBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                available: true,
                ..Default::default()
            })),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }

    pub fn set_available(&self, available: bool) {
        self.state().available = available;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state().connect_delay = delay;
    }

    /// Simulate the broker closing the current connection.
    pub fn drop_connection(&self) {
        if let Some(events) = self.state().events.take() {
            let _ = events.send(ConnectionEvent::Closed("connection reset by peer".into()));
        }
    }

    /// Deliver `payload` to one live consumer of `queue`. Returns false if none is listening.
    pub fn deliver(&self, queue: &str, payload: &[u8]) -> bool {
        let mut state = self.state();
        let Some(consumers) = state.consumers.get_mut(queue) else {
            return false;
        };
        consumers.retain(|tx| !tx.is_closed());
        match consumers.first() {
            Some(tx) => tx.send(payload.to_vec()).is_ok(),
            None => false,
        }
    }

    pub fn live_consumers(&self, queue: &str) -> usize {
        self.state()
            .consumers
            .get(queue)
            .map(|c| c.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn declares(&self, queue: &str) -> usize {
        self.state().declares.get(queue).copied().unwrap_or(0)
    }

    pub fn published_payloads(&self) -> Vec<Vec<u8>> {
        self.state().published.iter().map(|(_, p)| p.clone()).collect()
    }

    fn check_available(&self) -> BrokerResult<()> {
        if self.state().available {
            Ok(())
        } else {
            Err(BrokerError::Transport("broker unreachable".into()))
        }
    }
}

#[async_trait]
impl BrokerConnector for FakeBroker {
    async fn connect(&self, events: mpsc::UnboundedSender<ConnectionEvent>) -> BrokerResult<Arc<dyn BrokerConnection>> {
        let delay = {
            let mut state = self.state();
            state.connect_calls += 1;
            state.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if !state.available {
            return Err(BrokerError::Transport("connection refused".into()));
        }
        state.open_connections += 1;
        state.events = Some(events);
        Ok(Arc::new(FakeConnection {
            broker: self.clone(),
            open: AtomicBool::new(true),
        }))
    }
}

struct FakeConnection {
    broker: FakeBroker,
    open: AtomicBool,
}

#[async_trait]
impl BrokerConnection for FakeConnection {
    async fn open_channel(&self) -> BrokerResult<Arc<dyn BrokerChannel>> {
        self.broker.check_available()?;
        Ok(Arc::new(FakeChannel {
            broker: self.broker.clone(),
        }))
    }

    async fn close(&self) -> BrokerResult<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            self.broker.state().open_connections -= 1;
        }
        Ok(())
    }
}

struct FakeChannel {
    broker: FakeBroker,
}

#[async_trait]
impl BrokerChannel for FakeChannel {
    async fn declare_exchange(&self, name: &str) -> BrokerResult<()> {
        self.broker.check_available()?;
        self.broker.state().exchanges.push(name.to_string());
        Ok(())
    }

    async fn declare_queue(&self, name: &str, _arguments: &QueueArguments) -> BrokerResult<()> {
        self.broker.check_available()?;
        *self.broker.state().declares.entry(name.to_string()).or_default() += 1;
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> BrokerResult<()> {
        self.broker.check_available()?;
        self.broker
            .state()
            .bindings
            .push((queue.to_string(), exchange.to_string(), routing_key.to_string()));
        Ok(())
    }

    async fn enable_publisher_confirms(&self) -> BrokerResult<()> {
        self.broker.check_available()?;
        self.broker.state().confirm_channels += 1;
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> BrokerResult<()> {
        self.broker.check_available()?;
        self.broker.state().published.push((queue.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> BrokerResult<()> {
        self.broker.check_available()?;
        self.broker.state().prefetch.push(count);
        Ok(())
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> BrokerResult<DeliveryStream> {
        self.broker.check_available()?;
        let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
        self.broker
            .state()
            .consumers
            .entry(queue.to_string())
            .or_default()
            .push(tx);

        let broker = self.broker.clone();
        let stream = futures_util::stream::unfold(rx, move |mut rx| {
            let broker = broker.clone();
            async move {
                let payload = rx.recv().await?;
                let delivery: Box<dyn Delivery> = Box::new(FakeDelivery { payload, broker });
                Some((Ok(delivery), rx))
            }
        });
        Ok(Box::pin(stream))
    }

    async fn close(&self) -> BrokerResult<()> {
        self.broker.state().closed_channels += 1;
        Ok(())
    }
}

struct FakeDelivery {
    payload: Vec<u8>,
    broker: FakeBroker,
}

#[async_trait]
impl Delivery for FakeDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn ack(&self) -> BrokerResult<()> {
        self.broker.state().acks.push(self.payload.clone());
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> BrokerResult<()> {
        self.broker.state().nacks.push((self.payload.clone(), requeue));
        Ok(())
    }
}

#[derive(Default)]
pub struct DriverState {
    pub failures_left: usize,
    pub connect_calls: usize,
    pub close_calls: usize,
}

/// In-memory document-store driver.
pub struct FakeDriver {
    state: Mutex<DriverState>,
    events: broadcast::Sender<DriverEvent>,
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Self::failing(0)
    }

    /// A driver whose first `failures` connects fail, each emitting `Disconnected`.
    pub fn failing(failures: usize) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            state: Mutex::new(DriverState {
                failures_left: failures,
                ..Default::default()
            }),
            events,
        })
    }

    pub fn state(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap()
    }

    pub fn emit(&self, event: DriverEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl DocumentDriver for FakeDriver {
    fn events(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }

    async fn connect(&self) -> Result<(), DocStoreError> {
        let mut state = self.state();
        state.connect_calls += 1;
        if state.failures_left > 0 {
            state.failures_left -= 1;
            drop(state);
            self.emit(DriverEvent::Disconnected);
            return Err(DocStoreError::Driver("server selection timeout".into()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), DocStoreError> {
        self.state().close_calls += 1;
        Ok(())
    }
}

/// Broker config with fast retry budgets.
pub fn broker_config() -> BrokerConfig {
    BrokerConfig {
        connect_retry: RetryPolicy::new(2, Duration::from_millis(100), 1.0),
        reconnect_retry: RetryPolicy::new(3, Duration::from_secs(1), 1.0),
        ..Default::default()
    }
}

/// Fast connect budget for the document store.
pub fn docstore_retry() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(100), 1.0)
}

/// Listener that records every transition.
pub fn recorder() -> (HealthListener, Arc<Mutex<Vec<Health>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener: HealthListener = Box::new(move |health| sink.lock().unwrap().push(health));
    (listener, seen)
}

/// Let spawned tasks run to quiescence.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Poll `condition` every 10ms (virtual time) for up to `limit`.
pub async fn wait_for<F: Fn() -> bool>(condition: F, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        settle().await;
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
