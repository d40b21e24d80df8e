//! The routed message unit: an event plus its addressing.
//!
//! Wire shape (JSON):
//!
//! ```text
//! {"type": "room_updated", "room_id": "R1", "user_id": 0, ...event fields}
//! ```
//!
//! An empty `room_id` and a zero `user_id` both mean "not set".

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::domain::foundation::{RoomId, UserId};

use super::GameEvent;

/// Who an envelope is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every connection currently in the room.
    Room(RoomId),
    /// The single connection of one user.
    User(UserId),
    /// Every registered connection (lobby broadcast).
    Everyone,
}

/// An event with its routing fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(
        default,
        serialize_with = "serialize_room_id",
        deserialize_with = "deserialize_room_id"
    )]
    pub room_id: Option<RoomId>,

    #[serde(
        default,
        serialize_with = "serialize_user_id",
        deserialize_with = "deserialize_user_id"
    )]
    pub user_id: Option<UserId>,

    #[serde(flatten)]
    pub event: GameEvent,
}

impl Envelope {
    /// Envelope addressed to everybody in a room.
    pub fn to_room(room_id: RoomId, event: GameEvent) -> Self {
        Self {
            room_id: Some(room_id),
            user_id: None,
            event,
        }
    }

    /// Envelope addressed to one user.
    pub fn to_user(user_id: UserId, event: GameEvent) -> Self {
        Self {
            room_id: None,
            user_id: Some(user_id),
            event,
        }
    }

    /// Envelope addressed to every connection.
    pub fn global(event: GameEvent) -> Self {
        Self {
            room_id: None,
            user_id: None,
            event,
        }
    }

    /// Sets the originating/affected user without changing a room audience.
    pub fn with_user(mut self, user_id: Option<UserId>) -> Self {
        self.user_id = user_id;
        self
    }

    /// The wire `type` of the carried event.
    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }

    /// Resolves the audience; the first match wins: room, then user, then everyone.
    pub fn audience(&self) -> Audience {
        match (&self.room_id, self.user_id) {
            (Some(room_id), _) => Audience::Room(room_id.clone()),
            (None, Some(user_id)) => Audience::User(user_id),
            (None, None) => Audience::Everyone,
        }
    }
}

fn serialize_room_id<S: Serializer>(room_id: &Option<RoomId>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(room_id.as_ref().map(RoomId::as_str).unwrap_or(""))
}

fn deserialize_room_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<RoomId>, D::Error> {
    let raw: Option<String> = Option::deserialize(d)?;
    Ok(raw.and_then(|s| RoomId::new(s).ok()))
}

fn serialize_user_id<S: Serializer>(user_id: &Option<UserId>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(user_id.map(|u| u.as_u64()).unwrap_or(0))
}

fn deserialize_user_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<UserId>, D::Error> {
    let raw: Option<u64> = Option::deserialize(d)?;
    Ok(raw.and_then(UserId::from_raw))
}

/// Collects the player ids listed in a room snapshot.
///
/// Accepts either `{"players": [{"user_id": 1}, ...]}` or
/// `{"player_ids": [1, 2]}`; ids of `0` and malformed entries are skipped.
pub fn room_snapshot_player_ids(room: &Value) -> Vec<UserId> {
    let mut ids = Vec::new();
    let mut push = |raw: Option<u64>| {
        if let Some(id) = raw.and_then(UserId::from_raw) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    };

    if let Some(players) = room.get("players").and_then(Value::as_array) {
        for player in players {
            push(player.get("user_id").and_then(Value::as_u64));
        }
    }
    if let Some(player_ids) = room.get("player_ids").and_then(Value::as_array) {
        for id in player_ids {
            push(id.as_u64());
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn room(id: &str) -> RoomId {
        RoomId::new(id).unwrap()
    }

    fn user(id: u64) -> UserId {
        UserId::from_raw(id).unwrap()
    }

    #[test]
    fn room_wins_over_user() {
        let envelope = Envelope::to_room(room("R1"), GameEvent::Ping).with_user(Some(user(3)));
        assert_eq!(envelope.audience(), Audience::Room(room("R1")));
    }

    #[test]
    fn user_without_room_is_unicast() {
        let envelope = Envelope::to_user(user(3), GameEvent::Ping);
        assert_eq!(envelope.audience(), Audience::User(user(3)));
    }

    #[test]
    fn no_addressing_is_global() {
        assert_eq!(Envelope::global(GameEvent::Ping).audience(), Audience::Everyone);
    }

    #[test]
    fn serializes_flat_with_empty_defaults() {
        let envelope = Envelope::global(GameEvent::RoomMessage { data: json!({"text": "hi"}) });
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["type"], "room_message");
        assert_eq!(json["room_id"], "");
        assert_eq!(json["user_id"], 0);
        assert_eq!(json["data"]["text"], "hi");
    }

    #[test]
    fn empty_room_and_zero_user_decode_as_unset() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"type":"test_message","room_id":"","user_id":0,"data":1}"#)
                .unwrap();

        assert_eq!(envelope.room_id, None);
        assert_eq!(envelope.user_id, None);
        assert_eq!(envelope.audience(), Audience::Everyone);
    }

    #[test]
    fn missing_routing_fields_default_to_unset() {
        let envelope: Envelope = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(envelope.event, GameEvent::Ping);
        assert_eq!(envelope.audience(), Audience::Everyone);
    }

    #[test]
    fn decodes_room_scoped_event() {
        let envelope: Envelope = serde_json::from_value(json!({
            "type": "room_updated",
            "room_id": "R1",
            "user_id": 9,
            "room": {"players": []}
        }))
        .unwrap();

        assert_eq!(envelope.audience(), Audience::Room(room("R1")));
        assert_eq!(envelope.user_id, Some(user(9)));
        assert_eq!(envelope.event_type(), "room_updated");
    }

    #[test]
    fn snapshot_player_ids_from_both_shapes() {
        let snapshot = json!({
            "players": [{"user_id": 1}, {"user_id": 0}, {"name": "no id"}],
            "player_ids": [2, 1, 3]
        });

        assert_eq!(room_snapshot_player_ids(&snapshot), vec![user(1), user(2), user(3)]);
    }

    #[test]
    fn snapshot_without_players_is_empty() {
        assert!(room_snapshot_player_ids(&json!({"name": "lobby"})).is_empty());
    }
}
