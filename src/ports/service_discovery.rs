//! ServiceDiscovery port - Which realtime instances are alive.
//!
//! Each instance registers itself with a TTL on startup and keeps the entry
//! fresh with a heartbeat. Entries of crashed instances simply expire.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::InstanceId;

/// Errors from the discovery backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscoveryError {
    #[error("discovery backend error: {0}")]
    Backend(String),

    #[error("invalid instance record: {0}")]
    InvalidRecord(String),
}

/// One registered, reachable instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub service_name: String,
    pub instance_id: InstanceId,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ServiceInstance {
    pub fn new(
        service_name: impl Into<String>,
        instance_id: InstanceId,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            instance_id,
            address: address.into(),
            port,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Port for instance registration and lookup.
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// Registers (or re-registers) an instance for `ttl`.
    async fn register(&self, instance: &ServiceInstance, ttl: Duration) -> Result<(), DiscoveryError>;

    async fn deregister(&self, service_name: &str, instance_id: &InstanceId) -> Result<(), DiscoveryError>;

    /// Live instances of a service, in no particular order.
    async fn instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>, DiscoveryError>;
}
