//! In-memory service discovery for tests and single-node setups.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::domain::foundation::InstanceId;
use crate::ports::{DiscoveryError, ServiceDiscovery, ServiceInstance};

/// In-memory [`ServiceDiscovery`] with per-entry expiry.
#[derive(Default)]
pub struct InMemoryServiceDiscovery {
    entries: Mutex<HashMap<(String, InstanceId), (ServiceInstance, Instant)>>,
}

impl InMemoryServiceDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<(String, InstanceId), (ServiceInstance, Instant)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ServiceDiscovery for InMemoryServiceDiscovery {
    async fn register(&self, instance: &ServiceInstance, ttl: Duration) -> Result<(), DiscoveryError> {
        let key = (instance.service_name.clone(), instance.instance_id.clone());
        self.entries().insert(key, (instance.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn deregister(&self, service_name: &str, instance_id: &InstanceId) -> Result<(), DiscoveryError> {
        self.entries()
            .remove(&(service_name.to_string(), instance_id.clone()));
        Ok(())
    }

    async fn instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>, DiscoveryError> {
        let now = Instant::now();
        let mut entries = self.entries();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(entries
            .values()
            .filter(|(instance, _)| instance.service_name == service_name)
            .map(|(instance, _)| instance.clone())
            .collect())
    }
}
