//! Managed-dependency contract and the closed set of dependency variants.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::broker::{BrokerClient, BrokerError};
use crate::docstore::{DocStoreClient, DocStoreError};
use crate::health::{Health, HealthListener};

#[derive(Debug, Error)]
pub enum DependencyError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    DocStore(#[from] DocStoreError),
}

/// Lifecycle every registered dependency exposes.
#[async_trait]
pub trait ManagedDependency: Send + Sync {
    fn health(&self) -> Health;

    async fn connect(&self) -> Result<(), DependencyError>;

    async fn disconnect(&self) -> Result<(), DependencyError>;

    fn on_health_change(&self, listener: HealthListener) -> &Self
    where
        Self: Sized;
}

#[async_trait]
impl ManagedDependency for BrokerClient {
    fn health(&self) -> Health {
        BrokerClient::health(self)
    }

    async fn connect(&self) -> Result<(), DependencyError> {
        Ok(BrokerClient::connect(self).await?)
    }

    async fn disconnect(&self) -> Result<(), DependencyError> {
        Ok(BrokerClient::disconnect(self).await?)
    }

    fn on_health_change(&self, listener: HealthListener) -> &Self {
        BrokerClient::on_health_change(self, listener)
    }
}

#[async_trait]
impl ManagedDependency for DocStoreClient {
    fn health(&self) -> Health {
        DocStoreClient::health(self)
    }

    async fn connect(&self) -> Result<(), DependencyError> {
        Ok(DocStoreClient::connect(self).await?)
    }

    async fn disconnect(&self) -> Result<(), DependencyError> {
        Ok(DocStoreClient::disconnect(self).await?)
    }

    fn on_health_change(&self, listener: HealthListener) -> &Self {
        DocStoreClient::on_health_change(self, listener)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Broker,
    DocStore,
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKind::Broker => f.write_str("broker"),
            DependencyKind::DocStore => f.write_str("docstore"),
        }
    }
}

/// A registered dependency.
#[derive(Debug, Clone)]
pub enum Dependency {
    Broker(BrokerClient),
    DocStore(DocStoreClient),
}

impl Dependency {
    pub fn kind(&self) -> DependencyKind {
        match self {
            Dependency::Broker(_) => DependencyKind::Broker,
            Dependency::DocStore(_) => DependencyKind::DocStore,
        }
    }
}

#[async_trait]
impl ManagedDependency for Dependency {
    fn health(&self) -> Health {
        match self {
            Dependency::Broker(client) => client.health(),
            Dependency::DocStore(client) => client.health(),
        }
    }

    async fn connect(&self) -> Result<(), DependencyError> {
        match self {
            Dependency::Broker(client) => ManagedDependency::connect(client).await,
            Dependency::DocStore(client) => ManagedDependency::connect(client).await,
        }
    }

    async fn disconnect(&self) -> Result<(), DependencyError> {
        match self {
            Dependency::Broker(client) => ManagedDependency::disconnect(client).await,
            Dependency::DocStore(client) => ManagedDependency::disconnect(client).await,
        }
    }

    fn on_health_change(&self, listener: HealthListener) -> &Self {
        match self {
            Dependency::Broker(client) => {
                client.on_health_change(listener);
            }
            Dependency::DocStore(client) => {
                client.on_health_change(listener);
            }
        }
        self
    }
}

impl From<BrokerClient> for Dependency {
    fn from(client: BrokerClient) -> Self {
        Dependency::Broker(client)
    }
}

impl From<DocStoreClient> for Dependency {
    fn from(client: DocStoreClient) -> Self {
        Dependency::DocStore(client)
    }
}
