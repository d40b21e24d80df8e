//! GameStatus enum for tracking the lifecycle of a game round.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a game round, as reported by the game-state manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    #[default]
    Waiting,
    Playing,
    Ended,
}

impl GameStatus {
    /// Returns true once the round is over and a settlement may exist.
    pub fn is_ended(&self) -> bool {
        matches!(self, GameStatus::Ended)
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GameStatus::Waiting => "waiting",
            GameStatus::Playing => "playing",
            GameStatus::Ended => "ended",
        };
        write!(f, "{}", s)
    }
}
