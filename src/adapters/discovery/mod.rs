//! Service discovery adapters.

mod in_memory;
mod redis;

pub use in_memory::InMemoryServiceDiscovery;
pub use redis::RedisServiceDiscovery;
