//! Game-state contract types consumed by the realtime core.
//!
//! The rules of each card game live elsewhere; this module only models what
//! the core needs to decide what to broadcast and to whom.

mod state;
mod status;

pub use state::{GameState, PlayerState};
pub use status::GameStatus;
