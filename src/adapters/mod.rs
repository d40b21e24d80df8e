//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the realtime core to external systems:
//! - `bus` - Message bus implementations (in-memory, Redis pub/sub)
//! - `discovery` - Instance registry (in-memory, Redis)
//! - `game_state` - Game snapshots and settlements (in-memory, Redis)
//! - `lock` - Lock providers (process-local, Redis)
//! - `http` - Axum router, control plane and health endpoints
//! - `websocket` - Connection hub, broadcaster and cross-instance bridge

pub mod bus;
pub mod discovery;
pub mod game_state;
pub mod http;
pub mod lock;
pub mod websocket;

pub use bus::{InMemoryMessageBus, RedisMessageBus};
pub use lock::{LocalLockProvider, RedisLockProvider};
