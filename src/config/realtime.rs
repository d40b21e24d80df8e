//! Realtime core sizing: hub workers, queues and fan-out.

use serde::Deserialize;

use super::error::ValidationError;

/// Hub, connection queue and broadcast tuning
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Workers draining the register/unregister queues
    #[serde(default = "default_hub_workers")]
    pub hub_workers: usize,

    /// Capacity of each hub queue; a full queue rejects new connections
    #[serde(default = "default_hub_queue_capacity")]
    pub hub_queue_capacity: usize,

    /// Frames buffered per connection before it is treated as a slow consumer
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,

    /// Audience size above which fan-out runs in parallel chunks
    #[serde(default = "default_fanout_parallel_threshold")]
    pub fanout_parallel_threshold: usize,

    /// Maximum fan-out chunks in flight
    #[serde(default = "default_fanout_max_concurrency")]
    pub fanout_max_concurrency: usize,

    /// Relay room events to other instances over Redis pub/sub
    #[serde(default)]
    pub bus_enabled: bool,
}

impl RealtimeConfig {
    /// Validate realtime configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        let positive = [
            (self.hub_workers, "realtime.hub_workers"),
            (self.hub_queue_capacity, "realtime.hub_queue_capacity"),
            (self.send_queue_capacity, "realtime.send_queue_capacity"),
            (self.fanout_parallel_threshold, "realtime.fanout_parallel_threshold"),
            (self.fanout_max_concurrency, "realtime.fanout_max_concurrency"),
        ];
        for (value, name) in positive {
            if value == 0 {
                return Err(ValidationError::MustBePositive(name));
            }
        }
        Ok(())
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            hub_workers: default_hub_workers(),
            hub_queue_capacity: default_hub_queue_capacity(),
            send_queue_capacity: default_send_queue_capacity(),
            fanout_parallel_threshold: default_fanout_parallel_threshold(),
            fanout_max_concurrency: default_fanout_max_concurrency(),
            bus_enabled: false,
        }
    }
}

fn default_hub_workers() -> usize {
    4
}

fn default_hub_queue_capacity() -> usize {
    1024
}

fn default_send_queue_capacity() -> usize {
    256
}

fn default_fanout_parallel_threshold() -> usize {
    64
}

fn default_fanout_max_concurrency() -> usize {
    16
}
