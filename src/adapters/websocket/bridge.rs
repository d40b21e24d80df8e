//! Bridge between the cross-instance bus and local connections.
//!
//! # Message Flow
//!
//! ```text
//! instance A: Broadcaster::publish ──▶ bus topic ──▶ every instance
//!                                                        │
//!                                                        ▼
//!                                           ┌────────────────────────┐
//!                                           │  CrossInstanceBridge   │
//!                                           │  1. unwrap BusMessage  │
//!                                           │  2. drop own messages  │
//!                                           │  3. route check        │
//!                                           └────────────────────────┘
//!                                                        │
//!                                                        ▼
//!                                     Broadcaster::publish_local_only
//! ```
//!
//! The bridge never publishes back to the bus, so a message crosses
//! instances at most once. Anything it cannot decode or route is dropped
//! with a debug log; the bus is best-effort.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;

use crate::domain::foundation::InstanceId;
use crate::domain::realtime::{event_types, Audience, Envelope};
use crate::ports::{
    BusError, BusHandler, BusMessage, MessageBus, SystemNotice, ROOM_BROADCAST_TOPIC,
    SYSTEM_NOTIFY_TOPIC,
};

use super::broadcaster::Broadcaster;

/// Event types accepted from the bus without a room.
pub const GLOBAL_BRIDGE_EVENT_TYPES: &[&str] = &[
    event_types::ROOM_CREATED,
    event_types::ROOM_DELETED,
    event_types::TEST_MESSAGE,
];

/// What happened to one inbound bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    Delivered,
    SelfOrigin,
    NoLocalMembers,
    Unroutable,
    Malformed,
    SystemNotice,
}

impl BridgeOutcome {
    fn as_label(self) -> &'static str {
        match self {
            BridgeOutcome::Delivered => "delivered",
            BridgeOutcome::SelfOrigin => "self_origin",
            BridgeOutcome::NoLocalMembers => "no_local_members",
            BridgeOutcome::Unroutable => "unroutable",
            BridgeOutcome::Malformed => "malformed",
            BridgeOutcome::SystemNotice => "system_notice",
        }
    }
}

/// Re-injects envelopes published by other instances into local delivery.
pub struct CrossInstanceBridge {
    instance_id: InstanceId,
    broadcaster: Arc<Broadcaster>,
}

impl CrossInstanceBridge {
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            instance_id: broadcaster.instance_id().clone(),
            broadcaster,
        }
    }

    /// Create as an Arc (for handing to a bus subscription).
    pub fn new_shared(broadcaster: Arc<Broadcaster>) -> Arc<Self> {
        Arc::new(Self::new(broadcaster))
    }

    /// Subscribes this bridge to the room and system topics.
    pub async fn register(self: &Arc<Self>, bus: &dyn MessageBus) -> Result<(), BusError> {
        bus.subscribe(&[ROOM_BROADCAST_TOPIC, SYSTEM_NOTIFY_TOPIC], self.clone())
            .await
    }

    /// Handles one raw bus message and reports what was done with it.
    pub async fn handle(&self, topic: &str, payload: &[u8]) -> BridgeOutcome {
        let outcome = self.route(topic, payload).await;
        counter!("bridge_messages_total", "outcome" => outcome.as_label()).increment(1);
        outcome
    }

    async fn route(&self, topic: &str, payload: &[u8]) -> BridgeOutcome {
        let message = match BusMessage::from_bytes(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(topic, error = %e, "Dropping malformed bus message");
                return BridgeOutcome::Malformed;
            }
        };

        if message.is_from(&self.instance_id) {
            return BridgeOutcome::SelfOrigin;
        }

        if topic == SYSTEM_NOTIFY_TOPIC {
            return self.on_system_notice(message);
        }

        let envelope: Envelope = match serde_json::from_value(message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(
                    topic,
                    source_instance = %message.source_instance,
                    error = %e,
                    "Dropping undecodable envelope"
                );
                return BridgeOutcome::Malformed;
            }
        };

        match envelope.audience() {
            Audience::Room(room_id) => {
                if !self.broadcaster.hub().has_local_members(&room_id) {
                    return BridgeOutcome::NoLocalMembers;
                }
            }
            Audience::User(_) | Audience::Everyone => {
                if !GLOBAL_BRIDGE_EVENT_TYPES.contains(&envelope.event_type()) {
                    tracing::debug!(
                        event_type = envelope.event_type(),
                        source_instance = %message.source_instance,
                        "Dropping unroutable bus message without room"
                    );
                    return BridgeOutcome::Unroutable;
                }
            }
        }

        let report = self.broadcaster.publish_local_only(&envelope).await;
        tracing::trace!(
            event_type = envelope.event_type(),
            source_instance = %message.source_instance,
            delivered = report.delivered,
            "Relayed bus message"
        );
        BridgeOutcome::Delivered
    }

    fn on_system_notice(&self, message: BusMessage) -> BridgeOutcome {
        match serde_json::from_value::<SystemNotice>(message.payload) {
            Ok(SystemNotice::InstanceUp { instance_id, address }) => {
                tracing::info!(peer = %instance_id, address, "Peer instance up");
                BridgeOutcome::SystemNotice
            }
            Ok(SystemNotice::InstanceDown { instance_id }) => {
                tracing::info!(peer = %instance_id, "Peer instance down");
                BridgeOutcome::SystemNotice
            }
            Err(e) => {
                tracing::debug!(error = %e, "Dropping malformed system notice");
                BridgeOutcome::Malformed
            }
        }
    }
}

#[async_trait]
impl BusHandler for CrossInstanceBridge {
    async fn on_message(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        self.handle(topic, payload).await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "CrossInstanceBridge"
    }
}
