//! Document-store client.
//!
//! # Responsibilities
//! - Run the initial connect under the retry budget
//! - Translate driver connectivity events into health transitions
//! - Close the driver on disconnect
//!
//! # Design Decisions
//! - The driver reconnects by itself, so losing the server only means BAD plus
//!   the liveness timer; there is no reconnect loop here
//! - Events before the first successful connect are ignored

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::docstore::driver::{DocStoreError, DocumentDriver, DriverEvent};
use crate::health::{Health, HealthListener, HealthTracker};
use crate::observability::metrics;
use crate::resilience::{retry_with_hook, RetryPolicy};

#[derive(Clone)]
pub struct DocStoreClient {
    inner: Arc<DocStoreInner>,
}

struct DocStoreInner {
    name: String,
    driver: Arc<dyn DocumentDriver>,
    health: HealthTracker,
    max_reconnect: Duration,
    connect_retry: RetryPolicy,
    connected_once: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl DocStoreClient {
    pub fn new(
        name: impl Into<String>,
        driver: Arc<dyn DocumentDriver>,
        connect_retry: RetryPolicy,
        max_reconnect: Duration,
    ) -> Self {
        let name = name.into();
        Self {
            inner: Arc::new(DocStoreInner {
                health: HealthTracker::new(name.clone()),
                name,
                driver,
                max_reconnect,
                connect_retry,
                connected_once: AtomicBool::new(false),
                listener: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn health(&self) -> Health {
        self.inner.health.current()
    }

    pub fn on_health_change(&self, listener: HealthListener) -> &Self {
        self.inner.health.subscribe(listener);
        self
    }

    /// Connect, retrying with the configured budget.
    pub async fn connect(&self) -> Result<(), DocStoreError> {
        let inner = &self.inner;
        if inner.health.current().is_terminal() {
            return Err(DocStoreError::Stopped);
        }
        inner.start_listener();

        let policy = inner.connect_retry;
        let name = inner.name.clone();
        let result = retry_with_hook(
            policy,
            || async {
                let result = inner.driver.connect().await;
                metrics::record_connect_attempt(&inner.name, result.is_ok());
                result
            },
            |attempt| {
                tracing::warn!(
                    dependency = %name,
                    attempt = attempt.attempt,
                    remaining = attempt.remaining,
                    delay_ms = attempt.delay.as_millis() as u64,
                    error = %attempt.error,
                    "Document store connect attempt failed, retrying"
                );
            },
        )
        .await;

        match result {
            Ok(()) => {
                inner.connected_once.store(true, Ordering::SeqCst);
                if inner.health.current().is_terminal() {
                    return Err(DocStoreError::Stopped);
                }
                inner.health.mark_good();
                tracing::info!(dependency = %inner.name, "Document store connected");
                Ok(())
            }
            Err(e) => {
                tracing::error!(dependency = %inner.name, error = %e, "Document store connect failed");
                Err(DocStoreError::ConnectFailed {
                    attempts: policy.max_attempts(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Stop the client and close the driver. Close errors are returned.
    pub async fn disconnect(&self) -> Result<(), DocStoreError> {
        let inner = &self.inner;
        inner.health.mark_stopped();
        if let Some(listener) = inner.listener.lock().unwrap_or_else(|p| p.into_inner()).take() {
            listener.abort();
        }

        inner.driver.close().await?;
        tracing::info!(dependency = %inner.name, "Document store disconnected");
        Ok(())
    }
}

impl fmt::Debug for DocStoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocStoreClient")
            .field("name", &self.inner.name)
            .field("health", &self.inner.health.current())
            .finish()
    }
}

impl DocStoreInner {
    fn start_listener(self: &Arc<Self>) {
        let mut slot = self.listener.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_some() {
            return;
        }

        let mut events = self.driver.events();
        let weak: Weak<Self> = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Document store event listener lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.on_driver_event(event);
            }
        }));
    }

    fn on_driver_event(&self, event: DriverEvent) {
        if !self.connected_once.load(Ordering::SeqCst) {
            tracing::debug!(dependency = %self.name, ?event, "Ignoring driver event before first connect");
            return;
        }

        match event {
            DriverEvent::Connected => {
                if self.health.mark_good() {
                    tracing::info!(dependency = %self.name, "Document store connection restored");
                }
            }
            DriverEvent::Disconnected => {
                if self.health.mark_bad(self.max_reconnect) {
                    tracing::warn!(
                        dependency = %self.name,
                        max_reconnect_ms = self.max_reconnect.as_millis() as u64,
                        "Document store connection lost, waiting for driver to reconnect"
                    );
                }
            }
        }
    }
}
