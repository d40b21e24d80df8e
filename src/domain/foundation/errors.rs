//! Domain failures and the codes reported to clients and services.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use thiserror::Error;

/// A raw value rejected while building an id or other value type.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("{field} is empty")]
    EmptyField { field: String },

    #[error("{field} is malformed: {reason}")]
    InvalidFormat { field: String, reason: String },
}

impl ValidationError {
    pub fn empty_field(field: impl Into<String>) -> Self {
        ValidationError::EmptyField { field: field.into() }
    }

    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Stable machine-readable failure codes, sent as `error` in HTTP bodies
/// and as `code` in WebSocket error frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Bad input
    ValidationFailed,
    InvalidFormat,
    UnknownAction,

    // Missing
    RoomNotFound,
    GameStateNotFound,

    Unauthorized,

    // Contention
    LockTimeout,

    // Dependencies
    CacheError,
    BusError,
    InternalError,
}

impl ErrorCode {
    /// True for failures caused by the caller's input rather than by us.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ErrorCode::ValidationFailed
                | ErrorCode::InvalidFormat
                | ErrorCode::UnknownAction
                | ErrorCode::RoomNotFound
                | ErrorCode::GameStateNotFound
                | ErrorCode::Unauthorized
        )
    }

    /// True when the same request may succeed if simply tried again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::LockTimeout)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::InvalidFormat => "INVALID_FORMAT",
            ErrorCode::UnknownAction => "UNKNOWN_ACTION",
            ErrorCode::RoomNotFound => "ROOM_NOT_FOUND",
            ErrorCode::GameStateNotFound => "GAME_STATE_NOT_FOUND",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::LockTimeout => "LOCK_TIMEOUT",
            ErrorCode::CacheError => "CACHE_ERROR",
            ErrorCode::BusError => "BUS_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", s)
    }
}

/// A failure with its code, a human-readable message and key/value context.
#[derive(Debug, Clone)]
pub struct DomainError {
    pub code: ErrorCode,
    pub message: String,
    pub details: HashMap<String, String>,
}

impl DomainError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: HashMap::new(),
        }
    }

    /// `ValidationFailed` with the offending field recorded under `field`.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::ValidationFailed,
            message: message.into(),
            details: HashMap::new(),
        }
        .with_detail("field", field.into())
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Error for DomainError {}

impl From<ValidationError> for DomainError {
    fn from(err: ValidationError) -> Self {
        let field = match &err {
            ValidationError::EmptyField { field } | ValidationError::InvalidFormat { field, .. } => {
                field.clone()
            }
        };
        DomainError::validation(field, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_room_id_message() {
        let err = ValidationError::empty_field("room_id");
        assert_eq!(err.to_string(), "room_id is empty");
    }

    #[test]
    fn display_prefixes_code() {
        let err = DomainError::new(ErrorCode::RoomNotFound, "Room not found");
        assert_eq!(format!("{}", err), "[ROOM_NOT_FOUND] Room not found");
    }

    #[test]
    fn domain_error_from_validation_keeps_field() {
        let err: DomainError = ValidationError::empty_field("user_id").into();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
        assert_eq!(err.details.get("field"), Some(&"user_id".to_string()));
    }

    #[test]
    fn lock_timeout_is_retryable_not_client_error() {
        assert!(ErrorCode::LockTimeout.is_retryable());
        assert!(!ErrorCode::LockTimeout.is_client_error());
        assert!(ErrorCode::UnknownAction.is_client_error());
    }
}
