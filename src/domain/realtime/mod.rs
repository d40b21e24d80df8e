//! Realtime message model: envelopes, typed events and audience routing.

mod envelope;
mod event;

pub use envelope::{room_snapshot_player_ids, Audience, Envelope};
pub use event::{event_types, GameEvent};
