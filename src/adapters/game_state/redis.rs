//! Redis-backed game-state reader.
//!
//! The rules engine writes `game_state:<room_id>` and, when a game ends,
//! `game_settlement:<room_id>` with a short TTL. This adapter only reads
//! both keys; the settlement stays in place until its TTL expires.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use serde_json::Value;

use crate::domain::foundation::{DomainError, ErrorCode, RoomId};
use crate::domain::game::GameState;
use crate::ports::{game_state_key, settlement_key, GameStateManager};

/// Redis [`GameStateManager`].
pub struct RedisGameStateStore {
    conn: MultiplexedConnection,
}

impl RedisGameStateStore {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

fn cache_error(room_id: &RoomId, err: impl std::fmt::Display) -> DomainError {
    DomainError::new(ErrorCode::CacheError, format!("game state cache: {}", err))
        .with_detail("room_id", room_id.as_str())
}

fn decode<T: serde::de::DeserializeOwned>(room_id: &RoomId, raw: Option<String>) -> Result<Option<T>, DomainError> {
    raw.map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| cache_error(room_id, e))
}

#[async_trait]
impl GameStateManager for RedisGameStateStore {
    async fn load(&self, room_id: &RoomId) -> Result<Option<GameState>, DomainError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(game_state_key(room_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| cache_error(room_id, e))?;

        decode(room_id, raw)
    }

    async fn settlement(&self, room_id: &RoomId) -> Result<Option<Value>, DomainError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(settlement_key(room_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| cache_error(room_id, e))?;

        decode(room_id, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::game::GameStatus;
    use serde_json::json;

    #[test]
    fn undecodable_snapshot_is_cache_error() {
        let room = RoomId::new("R1").unwrap();
        let err = decode::<GameState>(&room, Some("{broken".into())).unwrap_err();

        assert_eq!(err.code, ErrorCode::CacheError);
        assert_eq!(err.details.get("room_id"), Some(&"R1".to_string()));
    }

    #[test]
    fn missing_key_decodes_to_none() {
        let room = RoomId::new("R1").unwrap();
        assert!(decode::<GameState>(&room, None).unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis (REDIS_URL)"]
    async fn reads_state_and_settlement_without_consuming() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let client = redis::Client::open(url).unwrap();
        let mut conn = client.get_multiplexed_tokio_connection().await.unwrap();
        let store = RedisGameStateStore::new(conn.clone());

        let room = RoomId::new(format!("test-{}", uuid::Uuid::new_v4())).unwrap();
        let state = GameState::new(room.clone(), GameStatus::Ended);
        let _: () = redis::cmd("SET")
            .arg(game_state_key(&room))
            .arg(serde_json::to_string(&state).unwrap())
            .arg("EX")
            .arg(30)
            .query_async(&mut conn)
            .await
            .unwrap();
        let _: () = redis::cmd("SET")
            .arg(settlement_key(&room))
            .arg(json!({"winner": 2}).to_string())
            .arg("EX")
            .arg(30)
            .query_async(&mut conn)
            .await
            .unwrap();

        assert_eq!(store.load(&room).await.unwrap(), Some(state));
        assert_eq!(store.settlement(&room).await.unwrap(), Some(json!({"winner": 2})));
        assert_eq!(store.settlement(&room).await.unwrap(), Some(json!({"winner": 2})));
    }
}
