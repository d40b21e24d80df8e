//! GameStateManager port - Read access to snapshots owned by the rules engine.
//!
//! The realtime core never mutates game state. It loads the latest snapshot
//! when it has to push an update, and reads the settlement when a game ends
//! so every player's `game_end` carries the same outcome.
//!
//! ## Storage Keys
//!
//! - `game_state:<room_id>` - JSON [`GameState`]
//! - `game_settlement:<room_id>` - JSON settlement, retired by its TTL

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::foundation::{DomainError, RoomId};
use crate::domain::game::GameState;

/// Cache key holding a room's current snapshot.
pub fn game_state_key(room_id: &RoomId) -> String {
    format!("game_state:{}", room_id)
}

/// Cache key holding a room's pending settlement.
pub fn settlement_key(room_id: &RoomId) -> String {
    format!("game_settlement:{}", room_id)
}

/// Port for reading game state.
#[async_trait]
pub trait GameStateManager: Send + Sync {
    /// Latest snapshot for a room, or `None` if no game exists.
    async fn load(&self, room_id: &RoomId) -> Result<Option<GameState>, DomainError>;

    /// The room's settlement, if one is still cached.
    ///
    /// Reading never consumes it: every instance that broadcasts `game_end`
    /// sees the same payload until the slot expires.
    async fn settlement(&self, room_id: &RoomId) -> Result<Option<Value>, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn GameStateManager) {}

    #[test]
    fn keys_are_namespaced_by_room() {
        let room = RoomId::new("R7").unwrap();
        assert_eq!(game_state_key(&room), "game_state:R7");
        assert_eq!(settlement_key(&room), "game_settlement:R7");
    }
}
