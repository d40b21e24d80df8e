//! Domain layer containing the realtime core's value types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, errors)
//! - `realtime` - Envelopes, typed events and audience resolution
//! - `game` - The game-state contract consumed from the rules engine

pub mod foundation;
pub mod game;
pub mod realtime;
