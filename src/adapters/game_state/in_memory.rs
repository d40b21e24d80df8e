//! In-memory game-state store for tests and single-node development.
//!
//! Plays the part of the rules engine's cache: tests seed snapshots and
//! settlements, the realtime core reads them through [`GameStateManager`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::foundation::{DomainError, RoomId};
use crate::domain::game::GameState;
use crate::ports::GameStateManager;

struct Settlement {
    value: Value,
    expires_at: Instant,
}

/// In-memory [`GameStateManager`].
#[derive(Default)]
pub struct InMemoryGameStateStore {
    states: RwLock<HashMap<RoomId, GameState>>,
    settlements: Mutex<HashMap<RoomId, Settlement>>,
}

impl InMemoryGameStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores (or replaces) the snapshot for its room.
    pub fn put_state(&self, state: GameState) {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        states.insert(state.room_id.clone(), state);
    }

    pub fn remove_state(&self, room_id: &RoomId) -> Option<GameState> {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        states.remove(room_id)
    }

    /// Stores a settlement readable until `ttl` runs out.
    pub fn put_settlement(&self, room_id: RoomId, value: Value, ttl: Duration) {
        self.settlements().insert(
            room_id,
            Settlement {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Whether an unexpired settlement is cached.
    pub fn has_settlement(&self, room_id: &RoomId) -> bool {
        self.settlements()
            .get(room_id)
            .is_some_and(|s| s.expires_at > Instant::now())
    }

    fn settlements(&self) -> MutexGuard<'_, HashMap<RoomId, Settlement>> {
        self.settlements.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl GameStateManager for InMemoryGameStateStore {
    async fn load(&self, room_id: &RoomId) -> Result<Option<GameState>, DomainError> {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        Ok(states.get(room_id).cloned())
    }

    async fn settlement(&self, room_id: &RoomId) -> Result<Option<Value>, DomainError> {
        let mut settlements = self.settlements();
        let now = Instant::now();
        settlements.retain(|_, s| s.expires_at > now);
        Ok(settlements.get(room_id).map(|s| s.value.clone()))
    }
}
