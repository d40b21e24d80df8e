//! Typed events carried by an [`Envelope`](super::Envelope).
//!
//! One variant per reserved `type` value. Decoding happens once at the
//! boundary (socket, bus, control plane); everything past that point matches
//! on the variant instead of poking at untyped JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::game::GameState;

/// Wire names of the reserved event types.
pub mod event_types {
    pub const CONNECTED: &str = "connected";
    pub const ROOM_JOINED: &str = "room_joined";
    pub const ROOM_LEFT: &str = "room_left";
    pub const ROOM_UPDATED: &str = "room_updated";
    pub const ROOM_CREATED: &str = "room_created";
    pub const ROOM_DELETED: &str = "room_deleted";
    pub const GAME_STATE_UPDATE: &str = "game_state_update";
    pub const GAME_STARTED: &str = "game_started";
    pub const GAME_END: &str = "game_end";
    pub const TIMER_START: &str = "timer_start";
    pub const TIMER_STOP: &str = "timer_stop";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const TEST_MESSAGE: &str = "test_message";
    pub const ROOM_MESSAGE: &str = "room_message";
    pub const ERROR: &str = "error";
}

/// Every event the realtime core sends to clients or relays between instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    /// Connection accepted and registered.
    Connected { client_id: String, instance_id: String },

    RoomJoined {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<Value>,
    },
    RoomLeft {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<Value>,
    },
    RoomUpdated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<Value>,
    },
    RoomCreated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<Value>,
    },
    RoomDeleted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<Value>,
    },

    GameStateUpdate { game_state: GameState },
    GameStarted { game_state: GameState },
    GameEnd {
        game_state: GameState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        settlement: Option<Value>,
    },
    TimerStart {
        game_state: GameState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timer: Option<Value>,
    },
    TimerStop { game_state: GameState },

    Ping,
    Pong { timestamp: i64 },

    TestMessage {
        #[serde(default)]
        data: Value,
    },
    RoomMessage {
        #[serde(default)]
        data: Value,
    },

    /// Reply to a malformed or rejected client frame.
    Error { code: String, message: String },
}

impl GameEvent {
    /// The wire `type` of this event.
    pub fn event_type(&self) -> &'static str {
        use event_types::*;
        match self {
            GameEvent::Connected { .. } => CONNECTED,
            GameEvent::RoomJoined { .. } => ROOM_JOINED,
            GameEvent::RoomLeft { .. } => ROOM_LEFT,
            GameEvent::RoomUpdated { .. } => ROOM_UPDATED,
            GameEvent::RoomCreated { .. } => ROOM_CREATED,
            GameEvent::RoomDeleted { .. } => ROOM_DELETED,
            GameEvent::GameStateUpdate { .. } => GAME_STATE_UPDATE,
            GameEvent::GameStarted { .. } => GAME_STARTED,
            GameEvent::GameEnd { .. } => GAME_END,
            GameEvent::TimerStart { .. } => TIMER_START,
            GameEvent::TimerStop { .. } => TIMER_STOP,
            GameEvent::Ping => PING,
            GameEvent::Pong { .. } => PONG,
            GameEvent::TestMessage { .. } => TEST_MESSAGE,
            GameEvent::RoomMessage { .. } => ROOM_MESSAGE,
            GameEvent::Error { .. } => ERROR,
        }
    }

    /// The game snapshot carried by game lifecycle events.
    pub fn game_state(&self) -> Option<&GameState> {
        match self {
            GameEvent::GameStateUpdate { game_state }
            | GameEvent::GameStarted { game_state }
            | GameEvent::GameEnd { game_state, .. }
            | GameEvent::TimerStart { game_state, .. }
            | GameEvent::TimerStop { game_state } => Some(game_state),
            _ => None,
        }
    }

    /// Replaces the carried game snapshot, leaving other fields untouched.
    pub fn with_game_state(mut self, state: GameState) -> Self {
        match &mut self {
            GameEvent::GameStateUpdate { game_state }
            | GameEvent::GameStarted { game_state }
            | GameEvent::GameEnd { game_state, .. }
            | GameEvent::TimerStart { game_state, .. }
            | GameEvent::TimerStop { game_state } => *game_state = state,
            _ => {}
        }
        self
    }
}
