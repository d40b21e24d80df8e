//! Application layer - wiring and use cases above the ports.
//!
//! - `context` builds every long-lived component once
//! - `control_plane` turns service notifications into client events
//! - `locking` runs work under a named lock
//! - `auth` verifies connection tokens

pub mod auth;
pub mod context;
pub mod control_plane;
pub mod locking;

pub use auth::TokenVerifier;
pub use context::{AppContext, AppContextBuilder, StartupError};
pub use control_plane::{ControlAction, ControlPlane, ControlRequest, NotifyReport};
pub use locking::{with_lock, with_lock_policy};
