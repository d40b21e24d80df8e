//! Bearer-token verification for WebSocket upgrades.
//!
//! Tokens are HS256 JWTs issued by the platform's account service. The only
//! claim the realtime core cares about is `sub`, the numeric user id.

use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::domain::foundation::{DomainError, ErrorCode, Timestamp, UserId};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// Numeric user id as a string.
    sub: String,

    /// Expiry (Unix epoch seconds).
    exp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    iat: Option<i64>,
}

/// Verifies (and, for tests and tooling, issues) connection tokens.
pub struct TokenVerifier {
    secret: SecretString,
    leeway: Duration,
}

impl TokenVerifier {
    pub fn new(secret: impl Into<String>, leeway: Duration) -> Self {
        Self {
            secret: SecretString::new(secret.into()),
            leeway,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.jwt_secret.clone(), config.leeway())
    }

    /// Returns the user a token was issued for.
    ///
    /// # Errors
    ///
    /// `Unauthorized` for a bad signature, an expired token, or a `sub` that
    /// is not a positive integer.
    pub fn verify(&self, token: &str) -> Result<UserId, DomainError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.leeway.as_secs();
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.expose_secret().as_bytes()),
            &validation,
        )
        .map_err(|e| {
            tracing::debug!(error = %e, "Rejected connection token");
            DomainError::new(ErrorCode::Unauthorized, "invalid or expired token")
        })?;

        data.claims
            .sub
            .parse::<UserId>()
            .map_err(|_| DomainError::new(ErrorCode::Unauthorized, "token subject is not a user id"))
    }

    /// Signs a token for `user_id` valid for `ttl`.
    pub fn issue(&self, user_id: UserId, ttl: Duration) -> Result<String, DomainError> {
        let now = Timestamp::now().as_unix_millis() / 1000;
        let claims = Claims {
            sub: user_id.to_string(),
            exp: now + ttl.as_secs() as i64,
            iat: Some(now),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.expose_secret().as_bytes()),
        )
        .map_err(|e| DomainError::new(ErrorCode::InternalError, format!("token signing failed: {}", e)))
    }
}
