//! Redis-backed service discovery.
//!
//! ## Key Layout
//!
//! - `discovery:<service>` - set of instance ids ever registered
//! - `discovery:<service>:<instance_id>` - JSON [`ServiceInstance`], expires after the TTL
//!
//! The member set does not expire on its own; `instances` prunes ids whose
//! record key has already expired.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use crate::domain::foundation::InstanceId;
use crate::ports::{DiscoveryError, ServiceDiscovery, ServiceInstance};

/// Redis [`ServiceDiscovery`].
pub struct RedisServiceDiscovery {
    conn: MultiplexedConnection,
}

impl RedisServiceDiscovery {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

fn members_key(service_name: &str) -> String {
    format!("discovery:{}", service_name)
}

fn record_key(service_name: &str, instance_id: &str) -> String {
    format!("discovery:{}:{}", service_name, instance_id)
}

fn backend(err: redis::RedisError) -> DiscoveryError {
    DiscoveryError::Backend(err.to_string())
}

#[async_trait]
impl ServiceDiscovery for RedisServiceDiscovery {
    async fn register(&self, instance: &ServiceInstance, ttl: Duration) -> Result<(), DiscoveryError> {
        let record =
            serde_json::to_string(instance).map_err(|e| DiscoveryError::InvalidRecord(e.to_string()))?;
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(record_key(&instance.service_name, instance.instance_id.as_str()))
            .arg(record)
            .arg("PX")
            .arg((ttl.as_millis() as u64).max(1))
            .ignore()
            .cmd("SADD")
            .arg(members_key(&instance.service_name))
            .arg(instance.instance_id.as_str())
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(backend)
    }

    async fn deregister(&self, service_name: &str, instance_id: &InstanceId) -> Result<(), DiscoveryError> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(record_key(service_name, instance_id.as_str()))
            .ignore()
            .cmd("SREM")
            .arg(members_key(service_name))
            .arg(instance_id.as_str())
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(backend)
    }

    async fn instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>, DiscoveryError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(members_key(service_name))
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        if members.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = members.iter().map(|id| record_key(service_name, id)).collect();
        let records: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        let mut instances = Vec::with_capacity(records.len());
        let mut expired = Vec::new();
        for (id, record) in members.into_iter().zip(records) {
            match record.map(|json| serde_json::from_str::<ServiceInstance>(&json)) {
                Some(Ok(instance)) => instances.push(instance),
                Some(Err(e)) => {
                    tracing::warn!(service_name, instance_id = %id, error = %e, "Skipping unreadable instance record");
                }
                None => expired.push(id),
            }
        }

        if !expired.is_empty() {
            tracing::debug!(service_name, count = expired.len(), "Pruning expired instances");
            let _: i64 = redis::cmd("SREM")
                .arg(members_key(service_name))
                .arg(&expired)
                .query_async(&mut conn)
                .await
                .map_err(backend)?;
        }

        Ok(instances)
    }
}
