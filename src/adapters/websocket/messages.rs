//! WebSocket frames sent by clients, and the replies built for them.
//!
//! Server → client traffic is always an [`Envelope`]; only the inbound
//! direction has its own protocol type.

use serde::Deserialize;
use serde_json::Value;

use crate::domain::foundation::{DomainError, ErrorCode, Timestamp};
use crate::domain::realtime::{Envelope, GameEvent};

// ============================================
// Client → Server Messages
// ============================================

/// All message types that can be received from a client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Heartbeat request.
    Ping,

    /// Sit down at a table. Leaves the current one first.
    JoinRoom { room_id: String },

    /// Stand up from the current table.
    LeaveRoom,

    /// Chat or table-talk relayed to everyone at the current table.
    RoomMessage {
        #[serde(default)]
        data: Value,
    },
}

impl ClientMessage {
    /// Parses one text frame.
    pub fn parse(text: &str) -> Result<Self, DomainError> {
        serde_json::from_str(text).map_err(|e| {
            let code = if e.is_data() && e.to_string().starts_with("unknown variant") {
                ErrorCode::UnknownAction
            } else {
                ErrorCode::InvalidFormat
            };
            DomainError::new(code, format!("invalid client frame: {}", e))
        })
    }
}

// ============================================
// Server → Client Replies
// ============================================

/// Heartbeat reply addressed to nobody in particular; sent directly.
pub fn pong() -> Envelope {
    Envelope::global(GameEvent::Pong {
        timestamp: Timestamp::now().as_unix_millis(),
    })
}

/// Error reply for a rejected frame.
pub fn error_reply(err: &DomainError) -> Envelope {
    Envelope::global(GameEvent::Error {
        code: err.code.to_string(),
        message: err.message.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_every_frame_type() {
        assert_eq!(ClientMessage::parse(r#"{"type":"ping"}"#).unwrap(), ClientMessage::Ping);
        assert_eq!(
            ClientMessage::parse(r#"{"type":"join_room","room_id":"R1"}"#).unwrap(),
            ClientMessage::JoinRoom { room_id: "R1".into() }
        );
        assert_eq!(ClientMessage::parse(r#"{"type":"leave_room"}"#).unwrap(), ClientMessage::LeaveRoom);
        assert_eq!(
            ClientMessage::parse(r#"{"type":"room_message","data":{"text":"gg"}}"#).unwrap(),
            ClientMessage::RoomMessage { data: json!({"text": "gg"}) }
        );
    }

    #[test]
    fn broken_json_is_invalid_format() {
        let err = ClientMessage::parse("{not json").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFormat);
    }

    #[test]
    fn unknown_type_is_unknown_action() {
        let err = ClientMessage::parse(r#"{"type":"fold"}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownAction);
    }

    #[test]
    fn join_room_requires_room_id() {
        let err = ClientMessage::parse(r#"{"type":"join_room"}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFormat);
    }

    #[test]
    fn error_reply_carries_code_and_message() {
        let envelope = error_reply(&DomainError::new(ErrorCode::InvalidFormat, "bad"));
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "INVALID_FORMAT");
        assert_eq!(json["message"], "bad");
    }

    #[test]
    fn pong_has_timestamp() {
        let json = serde_json::to_value(pong()).unwrap();
        assert_eq!(json["type"], "pong");
        assert!(json["timestamp"].as_i64().unwrap() > 0);
    }
}
