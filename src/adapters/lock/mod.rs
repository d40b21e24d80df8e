//! Lock provider adapters.
//!
//! - [`LocalLockProvider`] - in-process arena with shared/exclusive leases
//! - [`RedisLockProvider`] - `SET NX PX` leases with token-checked release

mod local;
mod redis;

pub use local::LocalLockProvider;
pub use redis::RedisLockProvider;
