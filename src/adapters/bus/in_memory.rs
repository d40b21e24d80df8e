//! In-memory message bus for tests and single-process setups.
//!
//! Mirrors Redis pub/sub semantics that matter to the bridge: every
//! subscriber of a topic receives every publication, the publisher's own
//! subscription included. Several `AppContext`s sharing one bus behave like
//! separate instances connected through Redis.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::ports::{BusError, BusHandler, MessageBus};

/// In-memory pub/sub bus.
///
/// Delivery is synchronous: `publish` returns after every handler ran.
#[derive(Default)]
pub struct InMemoryMessageBus {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn BusHandler>>>>,
    published: RwLock<Vec<(String, Vec<u8>)>>,
}

impl InMemoryMessageBus {
    /// Creates a new bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    // === Test Helpers ===

    /// Every `(topic, payload)` published so far, in order.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of publications on one topic.
    pub fn published_count(&self, topic: &str) -> usize {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(t, _)| t == topic)
            .count()
    }

    /// Number of handlers subscribed to a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Clears the publication log (for test isolation).
    pub fn clear(&self) {
        self.published
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let handlers: Vec<Arc<dyn BusHandler>> = {
            self.published
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push((topic.to_string(), payload.clone()));

            self.handlers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(topic)
                .cloned()
                .unwrap_or_default()
        };

        for handler in handlers {
            if let Err(e) = handler.on_message(topic, &payload).await {
                tracing::warn!(topic, handler = handler.name(), error = %e, "Bus handler failed");
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topics: &[&str], handler: Arc<dyn BusHandler>) -> Result<(), BusError> {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        for topic in topics {
            handlers
                .entry((*topic).to_string())
                .or_default()
                .push(handler.clone());
        }
        Ok(())
    }
}
