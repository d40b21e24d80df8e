//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the realtime core and the outside world. Adapters implement these ports.
//!
//! ## Coordination Ports
//!
//! - `LockProvider` - Named locks, local or shared across instances
//!
//! ## Scaling Infrastructure Ports
//!
//! - `MessageBus` - Cross-instance pub/sub for room events
//! - `ServiceDiscovery` - Registry of live realtime instances
//!
//! ## Game Ports
//!
//! - `GameStateManager` - Read-only access to snapshots and settlements

mod game_state;
mod lock_provider;
mod message_bus;
mod service_discovery;

pub use game_state::{game_state_key, settlement_key, GameStateManager};
pub use lock_provider::{acquire_with_retry, lock_key, LockError, LockLease, LockProvider, RetryPolicy};
pub use message_bus::{
    BusError, BusHandler, BusMessage, MessageBus, SystemNotice, ROOM_BROADCAST_TOPIC,
    SYSTEM_NOTIFY_TOPIC,
};
pub use service_discovery::{DiscoveryError, ServiceDiscovery, ServiceInstance};
