//! Redis connection settings.
//!
//! Redis backs the distributed lock, the cross-instance bus, discovery and
//! the game-state cache. The section is optional: a single instance with the
//! local lock backend and no bus runs without it.

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// `redis://` or `rediss://` URL, credentials included.
    pub url: String,

    /// Bound on the initial connection attempt at startup.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl RedisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(ValidationError::MissingRequired("REDIS_URL"));
        }
        if !["redis://", "rediss://"].iter().any(|scheme| url.starts_with(scheme)) {
            return Err(ValidationError::InvalidRedisUrl);
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::MustBePositive("redis.timeout_secs"));
        }
        Ok(())
    }

    /// Build a client for this URL. Does not open a connection.
    pub fn client(&self) -> Result<redis::Client, ValidationError> {
        redis::Client::open(self.url.trim()).map_err(|_| ValidationError::InvalidRedisUrl)
    }
}

fn default_timeout() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_url(url: &str) -> RedisConfig {
        RedisConfig {
            url: url.to_string(),
            timeout_secs: default_timeout(),
        }
    }

    #[test]
    fn accepts_plain_and_tls_urls() {
        assert!(with_url("redis://localhost:6379").validate().is_ok());
        assert!(with_url("rediss://cardroom:pw@cache.internal:6380/2").validate().is_ok());
        assert_eq!(with_url("redis://localhost").timeout(), Duration::from_secs(5));
    }

    #[test]
    fn blank_url_is_missing() {
        assert!(matches!(
            with_url("  ").validate(),
            Err(ValidationError::MissingRequired("REDIS_URL"))
        ));
    }

    #[test]
    fn other_schemes_rejected() {
        assert!(matches!(
            with_url("http://localhost:6379").validate(),
            Err(ValidationError::InvalidRedisUrl)
        ));
    }

    #[test]
    fn zero_timeout_rejected() {
        let config = RedisConfig {
            timeout_secs: 0,
            ..with_url("redis://localhost:6379")
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::MustBePositive("redis.timeout_secs"))
        ));
    }

    #[test]
    fn client_builds_without_connecting() {
        assert!(with_url("redis://127.0.0.1:1").client().is_ok());
    }
}
