//! MessageBus port - Fire-and-forget pub/sub between server instances.
//!
//! Every instance publishes room events it produced onto a shared topic and
//! subscribes to the same topic to pick up events produced elsewhere.
//! Delivery is at-most-once; a dropped message is never replayed.
//!
//! ## Message Wrapper
//!
//! Payloads travel wrapped in a [`BusMessage`] so receivers can recognise
//! their own publications and drop them:
//!
//! ```text
//! {"source_instance": "host:8080-ab12cd34", "timestamp": 1700000000000, "payload": {...}}
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::foundation::{DomainError, ErrorCode, InstanceId, Timestamp};

/// Topic carrying room/lobby envelopes between instances.
pub const ROOM_BROADCAST_TOPIC: &str = "cardroom:broadcast";

/// Topic for operational notices (instance joined/left, etc.).
pub const SYSTEM_NOTIFY_TOPIC: &str = "cardroom:system";

/// Errors from the bus transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    #[error("bus connection failed: {0}")]
    Connection(String),

    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("bus message could not be encoded: {0}")]
    Serialization(String),

    #[error("bus is closed")]
    Closed,
}

impl From<BusError> for DomainError {
    fn from(err: BusError) -> Self {
        DomainError::new(ErrorCode::BusError, err.to_string())
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::Serialization(err.to_string())
    }
}

/// Receives messages for the topics it was subscribed to.
///
/// Handlers run on the bus's delivery task, so they must return promptly.
/// Returning an error only gets logged; it never stops delivery.
#[async_trait]
pub trait BusHandler: Send + Sync {
    async fn on_message(&self, topic: &str, payload: &[u8]) -> Result<(), BusError>;

    /// Handler name for logging.
    fn name(&self) -> &'static str;
}

/// Port for the cross-instance pub/sub transport.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes raw bytes to a topic. Returns once the transport accepted it.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Registers `handler` for every topic in `topics`.
    async fn subscribe(&self, topics: &[&str], handler: Arc<dyn BusHandler>) -> Result<(), BusError>;
}

/// Wrapper put around every payload crossing the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub source_instance: InstanceId,
    /// Unix milliseconds at publish time.
    pub timestamp: i64,
    pub payload: Value,
}

impl BusMessage {
    pub fn new(source_instance: InstanceId, payload: Value) -> Self {
        Self {
            source_instance,
            timestamp: Timestamp::now().as_unix_millis(),
            payload,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BusError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a wrapper.
    ///
    /// Bare payloads published by older instances (no `source_instance`) are
    /// accepted with an empty source, so they are never mistaken for ours.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BusError> {
        let value: Value = serde_json::from_slice(bytes)?;

        let wrapped = value
            .as_object()
            .map(|obj| obj.contains_key("source_instance") && obj.contains_key("payload"))
            .unwrap_or(false);

        if wrapped {
            Ok(serde_json::from_value(value)?)
        } else {
            Ok(Self {
                source_instance: InstanceId::new(""),
                timestamp: 0,
                payload: value,
            })
        }
    }

    /// True when this message was published by `instance`.
    pub fn is_from(&self, instance: &InstanceId) -> bool {
        &self.source_instance == instance
    }
}

/// Payloads carried on [`SYSTEM_NOTIFY_TOPIC`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SystemNotice {
    /// An instance finished starting and is accepting connections.
    InstanceUp { instance_id: InstanceId, address: String },
    /// An instance is shutting down.
    InstanceDown { instance_id: InstanceId },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn MessageBus, _: &dyn BusHandler) {}

    #[test]
    fn wrapper_decodes_back() {
        let message = BusMessage::new(InstanceId::new("a"), json!({"type": "ping"}));
        let decoded = BusMessage::from_bytes(&message.to_bytes().unwrap()).unwrap();

        assert_eq!(decoded, message);
        assert!(decoded.is_from(&InstanceId::new("a")));
        assert!(!decoded.is_from(&InstanceId::new("b")));
    }

    #[test]
    fn bare_payload_is_accepted_without_source() {
        let decoded = BusMessage::from_bytes(br#"{"type":"room_created"}"#).unwrap();

        assert_eq!(decoded.payload["type"], "room_created");
        assert_eq!(decoded.source_instance.as_str(), "");
    }

    #[test]
    fn garbage_is_a_serialization_error() {
        assert!(matches!(
            BusMessage::from_bytes(b"not json"),
            Err(BusError::Serialization(_))
        ));
    }

    #[test]
    fn system_notice_is_tagged_by_kind() {
        let notice = SystemNotice::InstanceDown { instance_id: InstanceId::new("a") };
        let json = serde_json::to_value(&notice).unwrap();

        assert_eq!(json, json!({"kind": "instance_down", "instance_id": "a"}));
    }

    #[test]
    fn bus_error_maps_to_bus_error_code() {
        let err: DomainError = BusError::Closed.into();
        assert_eq!(err.code, ErrorCode::BusError);
    }
}
