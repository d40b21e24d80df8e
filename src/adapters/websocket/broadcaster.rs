//! Fan-out of envelopes to local connections, plus optional bus republish.
//!
//! The envelope is serialized once and the same frame is queued on every
//! target. Queues are never waited on: a full queue means the consumer is
//! too slow and the connection is dropped.
//!
//! Small audiences are served inline. Above `parallel_threshold` targets the
//! list is split into chunks delivered by spawned tasks, bounded by a
//! semaphore so a huge room never turns into thousands of tasks.

use std::collections::HashSet;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::domain::foundation::{InstanceId, UserId};
use crate::domain::realtime::{event_types, Audience, Envelope};
use crate::ports::{BusError, BusMessage, MessageBus, ROOM_BROADCAST_TOPIC};

use super::client::{Client, Frame, SendError};
use super::hub::Hub;

/// Event types `publish` also forwards to other instances.
///
/// Everything else is routed instance-by-instance by its caller.
pub const BUS_FORWARDED_EVENT_TYPES: &[&str] = &[
    event_types::TEST_MESSAGE,
    event_types::ROOM_MESSAGE,
    event_types::ROOM_CREATED,
    event_types::ROOM_DELETED,
    event_types::ROOM_UPDATED,
];

/// Tuning for the fan-out path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcasterConfig {
    /// Audiences larger than this are delivered in parallel chunks.
    pub parallel_threshold: usize,
    /// Maximum chunks delivered at the same time.
    pub max_concurrency: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            parallel_threshold: 64,
            max_concurrency: 16,
        }
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections the envelope was addressed to.
    pub targets: usize,
    /// Frames queued successfully.
    pub delivered: usize,
    /// Targets dropped because their queue was full or closed.
    pub dropped: usize,
}

impl DeliveryReport {
    fn merge(&mut self, other: DeliveryReport) {
        self.targets += other.targets;
        self.delivered += other.delivered;
        self.dropped += other.dropped;
    }
}

/// Delivers envelopes to the connections registered in the [`Hub`].
pub struct Broadcaster {
    hub: Arc<Hub>,
    bus: Option<Arc<dyn MessageBus>>,
    instance_id: InstanceId,
    config: BroadcasterConfig,
    fanout_permits: Arc<Semaphore>,
}

impl Broadcaster {
    pub fn new(
        hub: Arc<Hub>,
        bus: Option<Arc<dyn MessageBus>>,
        instance_id: InstanceId,
        config: BroadcasterConfig,
    ) -> Self {
        Self {
            hub,
            bus,
            instance_id,
            fanout_permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            config,
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Delivers locally and, for forwarded event types, republishes to the bus.
    pub async fn publish(&self, envelope: &Envelope) -> DeliveryReport {
        let report = self.publish_local_only(envelope).await;
        if BUS_FORWARDED_EVENT_TYPES.contains(&envelope.event_type()) {
            self.forward_to_bus(envelope);
        }
        report
    }

    /// Delivers to local connections only. Never touches the bus.
    pub async fn publish_local_only(&self, envelope: &Envelope) -> DeliveryReport {
        let targets = self.resolve(&envelope.audience());
        self.deliver(envelope, targets).await
    }

    /// Like [`publish_local_only`](Self::publish_local_only) but skips the
    /// connections of `excluded` users.
    pub async fn publish_local_except(
        &self,
        envelope: &Envelope,
        excluded: &HashSet<UserId>,
    ) -> DeliveryReport {
        let targets = self
            .resolve(&envelope.audience())
            .into_iter()
            .filter(|client| !excluded.contains(&client.user_id()))
            .collect();
        self.deliver(envelope, targets).await
    }

    /// Sends to one user's connection regardless of the room they are in.
    ///
    /// The envelope keeps its `room_id` on the wire so the client can tell
    /// which table it belongs to.
    pub async fn deliver_to_user(&self, user_id: UserId, envelope: &Envelope) -> DeliveryReport {
        let targets = self.hub.client_for_user(user_id).into_iter().collect();
        self.deliver(envelope, targets).await
    }

    /// Queues an envelope on one specific connection (replies, greetings).
    pub fn deliver_to_client(&self, client: &Arc<Client>, envelope: &Envelope) -> DeliveryReport {
        match serde_json::to_string(envelope) {
            Ok(json) => deliver_chunk(&self.hub, &Arc::from(json), std::slice::from_ref(client)),
            Err(e) => {
                tracing::warn!(event_type = envelope.event_type(), error = %e, "Failed to serialize envelope");
                DeliveryReport::default()
            }
        }
    }

    fn resolve(&self, audience: &Audience) -> Vec<Arc<Client>> {
        match audience {
            Audience::Room(room_id) => self.hub.clients_in_room(room_id),
            Audience::User(user_id) => self.hub.client_for_user(*user_id).into_iter().collect(),
            Audience::Everyone => self.hub.all_clients(),
        }
    }

    async fn deliver(&self, envelope: &Envelope, targets: Vec<Arc<Client>>) -> DeliveryReport {
        if targets.is_empty() {
            return DeliveryReport::default();
        }

        let frame: Frame = match serde_json::to_string(envelope) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                tracing::warn!(event_type = envelope.event_type(), error = %e, "Failed to serialize envelope");
                return DeliveryReport::default();
            }
        };

        let report = if targets.len() <= self.config.parallel_threshold {
            deliver_chunk(&self.hub, &frame, &targets)
        } else {
            self.deliver_parallel(frame, targets).await
        };

        tracing::debug!(
            event_type = envelope.event_type(),
            targets = report.targets,
            delivered = report.delivered,
            dropped = report.dropped,
            "Broadcast delivered"
        );
        report
    }

    async fn deliver_parallel(&self, frame: Frame, targets: Vec<Arc<Client>>) -> DeliveryReport {
        let chunk_size = self.config.parallel_threshold.max(1);
        let mut tasks = JoinSet::new();

        for chunk in targets.chunks(chunk_size) {
            let chunk = chunk.to_vec();
            let hub = self.hub.clone();
            let frame = frame.clone();
            let permits = self.fanout_permits.clone();

            tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = permits.acquire_owned().await.ok();
                deliver_chunk(&hub, &frame, &chunk)
            });
        }

        let mut report = DeliveryReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(chunk_report) => report.merge(chunk_report),
                Err(e) => tracing::error!(error = %e, "Fan-out task failed"),
            }
        }
        report
    }

    fn forward_to_bus(&self, envelope: &Envelope) {
        let Some(bus) = self.bus.clone() else {
            return;
        };

        let payload = match serde_json::to_value(envelope)
            .map_err(BusError::from)
            .and_then(|value| BusMessage::new(self.instance_id.clone(), value).to_bytes())
        {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(event_type = envelope.event_type(), error = %e, "Failed to encode bus message");
                return;
            }
        };

        let event_type = envelope.event_type();
        tokio::spawn(async move {
            if let Err(e) = bus.publish(ROOM_BROADCAST_TOPIC, payload).await {
                counter!("bus_publish_failures_total").increment(1);
                tracing::warn!(event_type, error = %e, "Failed to forward envelope to bus");
            }
        });
    }
}

fn deliver_chunk(hub: &Hub, frame: &Frame, targets: &[Arc<Client>]) -> DeliveryReport {
    let mut report = DeliveryReport {
        targets: targets.len(),
        ..DeliveryReport::default()
    };

    for client in targets {
        match client.try_send(frame.clone()) {
            Ok(()) => report.delivered += 1,
            Err(SendError::Full) => {
                report.dropped += 1;
                counter!("broadcast_slow_consumer_disconnects_total").increment(1);
                tracing::warn!(
                    client_id = %client.id(),
                    user_id = %client.user_id(),
                    "Send queue full, disconnecting slow client"
                );
                hub.unregister(client);
            }
            Err(SendError::Closed) => {
                report.dropped += 1;
                hub.unregister(client);
            }
        }
    }

    counter!("broadcast_deliveries_total").increment(report.delivered as u64);
    report
}
