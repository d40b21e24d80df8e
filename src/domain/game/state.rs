//! Game-state snapshot as published by the game-state manager.
//!
//! The rules engine owns this data; the realtime core only needs the player
//! list (to know whom to notify) and the ability to hide private information
//! from everybody but its owner before the snapshot leaves the process.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::foundation::{RoomId, UserId};

use super::GameStatus;

/// One seat in a game snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub user_id: UserId,

    /// Cards held by the player. Private to `user_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hand: Option<Vec<Value>>,

    /// Number of cards held, kept when `hand` is redacted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hand_count: Option<usize>,

    /// Any other per-player information only the owner may see
    /// (e.g. an evaluated hand before the reveal).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<Value>,

    /// Public per-player fields (seat, chips, ready flag, ...).
    #[serde(flatten)]
    pub public: Map<String, Value>,
}

impl PlayerState {
    /// Drops everything only the owner may see.
    fn redact(&mut self) {
        if let Some(hand) = self.hand.take() {
            self.hand_count = Some(hand.len());
        }
        self.private = None;
    }
}

/// Snapshot of one room's game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub room_id: RoomId,

    #[serde(default)]
    pub status: GameStatus,

    #[serde(default)]
    pub players: Vec<PlayerState>,

    /// Public table-level fields (round, pot, dealer, timers, ...).
    #[serde(flatten)]
    pub table: Map<String, Value>,
}

impl GameState {
    /// Creates an empty snapshot for a room.
    pub fn new(room_id: RoomId, status: GameStatus) -> Self {
        Self {
            room_id,
            status,
            players: Vec::new(),
            table: Map::new(),
        }
    }

    /// Ids of every seated player, in seat order, without duplicates.
    pub fn player_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = Vec::with_capacity(self.players.len());
        for player in &self.players {
            if !ids.contains(&player.user_id) {
                ids.push(player.user_id);
            }
        }
        ids
    }

    /// Returns the view of this snapshot that `viewer` is allowed to see.
    ///
    /// Every other player's hand and private data are removed; the viewer's
    /// own seat is left untouched. `None` (anonymous) redacts every seat.
    pub fn filtered_for(&self, viewer: Option<UserId>) -> GameState {
        let mut view = self.clone();
        for player in &mut view.players {
            if Some(player.user_id) != viewer {
                player.redact();
            }
        }
        view
    }
}
