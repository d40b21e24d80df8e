//! Game-state manager adapters.

mod in_memory;
mod redis;

pub use in_memory::InMemoryGameStateStore;
pub use redis::RedisGameStateStore;
