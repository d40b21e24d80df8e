//! Authentication configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Authentication configuration for WebSocket upgrades.
///
/// Clients present an HS256 JWT issued by the account service; both sides
/// share `jwt_secret`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Shared HMAC secret for JWT verification
    #[serde(default)]
    pub jwt_secret: String,

    /// Accepted clock skew in seconds when checking `exp`
    #[serde(default = "default_leeway")]
    pub leeway_secs: u64,
}

impl AuthConfig {
    /// Get leeway as Duration
    pub fn leeway(&self) -> Duration {
        Duration::from_secs(self.leeway_secs)
    }

    /// Validate authentication configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.jwt_secret.trim().is_empty() {
            return Err(ValidationError::MissingRequired("AUTH__JWT_SECRET"));
        }
        Ok(())
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            leeway_secs: default_leeway(),
        }
    }
}

fn default_leeway() -> u64 {
    30
}
