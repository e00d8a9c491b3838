//! MongoDB driver.
//!
//! # Responsibilities
//! - Build client options from configuration (timeouts, heartbeat)
//! - Verify the first connection with a `ping`
//! - Monitor the server on the heartbeat interval and emit connectivity transitions
//!
//! # Design Decisions
//! - The official driver already re-establishes its pool; the monitor only observes
//! - Events are emitted on edges, never on every heartbeat

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use mongodb::{Client, Database};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::DocStoreConfig;
use crate::docstore::driver::{DocStoreError, DocumentDriver, DriverEvent};

const EVENT_CAPACITY: usize = 16;

impl From<mongodb::error::Error> for DocStoreError {
    fn from(err: mongodb::error::Error) -> Self {
        DocStoreError::Driver(err.to_string())
    }
}

pub struct MongoDriver {
    client: Client,
    database: String,
    heartbeat: Duration,
    events: broadcast::Sender<DriverEvent>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl MongoDriver {
    /// Build the driver. No connection is made until [`DocumentDriver::connect`].
    pub async fn new(config: &DocStoreConfig, app_name: &str) -> Result<Self, DocStoreError> {
        let uri = config.uri().map_err(|e| DocStoreError::InvalidUri(e.to_string()))?;

        let mut options = ClientOptions::parse(uri.as_str()).await?;
        options.app_name = Some(app_name.to_string());
        options.server_selection_timeout = Some(Duration::from_millis(config.server_selection_timeout_ms));
        options.connect_timeout = Some(Duration::from_millis(config.connect_timeout_ms));
        options.heartbeat_freq = Some(Duration::from_millis(config.heartbeat_frequency_ms));

        let client = Client::with_options(options)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            client,
            database: config.database.clone(),
            heartbeat: Duration::from_millis(config.heartbeat_frequency_ms),
            events,
            monitor: Mutex::new(None),
        })
    }

    /// Handle to the configured database.
    pub fn database(&self) -> Database {
        self.client.database(&self.database)
    }

    fn start_monitor(&self) {
        let mut slot = self.monitor.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_some() {
            return;
        }

        let database = self.database();
        let events = self.events.clone();
        let heartbeat = self.heartbeat;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat);
            ticker.tick().await;
            let mut reachable = true;
            loop {
                ticker.tick().await;
                let ok = ping(&database).await.is_ok();
                if ok != reachable {
                    reachable = ok;
                    let event = if ok { DriverEvent::Connected } else { DriverEvent::Disconnected };
                    tracing::debug!(?event, "Document store connectivity changed");
                    let _ = events.send(event);
                }
            }
        }));
    }
}

async fn ping(database: &Database) -> Result<(), mongodb::error::Error> {
    database.run_command(doc! { "ping": 1 }, None).await?;
    Ok(())
}

#[async_trait]
impl DocumentDriver for MongoDriver {
    fn events(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }

    async fn connect(&self) -> Result<(), DocStoreError> {
        ping(&self.database()).await?;
        self.start_monitor();
        Ok(())
    }

    async fn close(&self) -> Result<(), DocStoreError> {
        if let Some(monitor) = self.monitor.lock().unwrap_or_else(|p| p.into_inner()).take() {
            monitor.abort();
        }
        self.client.clone().shutdown().await;
        Ok(())
    }
}

impl std::fmt::Debug for MongoDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoDriver")
            .field("database", &self.database)
            .field("heartbeat", &self.heartbeat)
            .finish_non_exhaustive()
    }
}
