//! Message bus adapters.
//!
//! - [`InMemoryMessageBus`] - in-process pub/sub for tests and single-node setups
//! - [`RedisMessageBus`] - Redis pub/sub shared by every instance

mod in_memory;
mod redis;

pub use in_memory::InMemoryMessageBus;
pub use redis::RedisMessageBus;
