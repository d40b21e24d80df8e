//! Redis pub/sub message bus for multi-instance deployments.
//!
//! Publishing goes over a shared multiplexed connection. Each `subscribe`
//! call owns a dedicated pub/sub connection driven by a background task,
//! which reconnects with backoff if Redis drops it and stops when the
//! shutdown token fires. Messages published while a subscriber is
//! reconnecting are lost; the bus is at-most-once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio_util::sync::CancellationToken;

use crate::ports::{BusError, BusHandler, MessageBus};

const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(10);

/// Redis-backed [`MessageBus`].
pub struct RedisMessageBus {
    client: redis::Client,
    conn: MultiplexedConnection,
    shutdown: CancellationToken,
}

impl RedisMessageBus {
    /// Opens the publishing connection.
    pub async fn connect(client: redis::Client, shutdown: CancellationToken) -> Result<Self, BusError> {
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            conn,
            shutdown,
        })
    }
}

async fn open_subscription(client: &redis::Client, topics: &[String]) -> Result<redis::aio::PubSub, BusError> {
    let mut pubsub = client
        .get_async_connection()
        .await
        .map_err(|e| BusError::Connection(e.to_string()))?
        .into_pubsub();
    for topic in topics {
        pubsub
            .subscribe(topic.as_str())
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;
    }
    Ok(pubsub)
}

async fn run_subscription(
    client: redis::Client,
    topics: Vec<String>,
    handler: Arc<dyn BusHandler>,
    mut pubsub: redis::aio::PubSub,
    shutdown: CancellationToken,
) {
    let mut backoff = Duration::from_millis(100);

    loop {
        {
            let mut messages = pubsub.on_message();
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    next = messages.next() => match next {
                        Some(msg) => {
                            backoff = Duration::from_millis(100);
                            let topic = msg.get_channel_name().to_string();
                            if let Err(e) = handler.on_message(&topic, msg.get_payload_bytes()).await {
                                tracing::warn!(topic, handler = handler.name(), error = %e, "Bus handler failed");
                            }
                        }
                        None => break,
                    },
                }
            }
        }

        tracing::warn!(handler = handler.name(), ?topics, "Redis subscription dropped, reconnecting");

        pubsub = loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            match open_subscription(&client, &topics).await {
                Ok(pubsub) => break pubsub,
                Err(e) => {
                    tracing::warn!(error = %e, ?backoff, "Redis resubscribe failed");
                    backoff = (backoff * 2).min(MAX_RECONNECT_BACKOFF);
                }
            }
        };
        tracing::info!(handler = handler.name(), ?topics, "Redis subscription restored");
    }
}

#[async_trait]
impl MessageBus for RedisMessageBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _receivers: i64 = conn.publish(topic, payload).await.map_err(|e| BusError::Publish {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    async fn subscribe(&self, topics: &[&str], handler: Arc<dyn BusHandler>) -> Result<(), BusError> {
        if self.shutdown.is_cancelled() {
            return Err(BusError::Closed);
        }

        let topics: Vec<String> = topics.iter().map(|t| (*t).to_string()).collect();
        let pubsub = open_subscription(&self.client, &topics).await?;

        tracing::info!(handler = handler.name(), ?topics, "Subscribed to Redis topics");
        tokio::spawn(run_subscription(
            self.client.clone(),
            topics,
            handler,
            pubsub,
            self.shutdown.clone(),
        ));
        Ok(())
    }
}
