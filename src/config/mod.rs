//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `CARDROOM` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use cardroom_realtime::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Server running on {:?}", config.server.socket_addr());
//! ```

mod auth;
mod error;
mod instance;
mod lock;
mod realtime;
mod redis;
mod server;

pub use auth::AuthConfig;
pub use error::{ConfigError, ValidationError};
pub use instance::InstanceConfig;
pub use lock::{LockBackend, LockConfig};
pub use realtime::RealtimeConfig;
pub use redis::RedisConfig;
pub use server::{Environment, ServerConfig};

use serde::Deserialize;

/// Root application configuration
///
/// Load using [`AppConfig::load()`] which reads from environment variables.
/// Every section has defaults except `redis`, which is only required when a
/// Redis-backed component is switched on.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment)
    #[serde(default)]
    pub server: ServerConfig,

    /// Redis configuration (locks, pub/sub, discovery, game-state cache)
    #[serde(default)]
    pub redis: Option<RedisConfig>,

    /// Hub, queue and fan-out sizing
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Lock provider selection and retry policy
    #[serde(default)]
    pub lock: LockConfig,

    /// WebSocket authentication
    #[serde(default)]
    pub auth: AuthConfig,

    /// Instance identity and discovery
    #[serde(default)]
    pub instance: InstanceConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `CARDROOM` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `CARDROOM__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `CARDROOM__LOCK__BACKEND=redis` -> `lock.backend = redis`
    /// - `CARDROOM__REDIS__URL=redis://...` -> `redis.url = ...`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if values cannot be parsed into expected types.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("CARDROOM")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// Missing Redis is a hard error whenever the Redis lock backend or the
    /// cross-instance bus is enabled, so a misconfigured deployment fails at
    /// startup instead of on the first locked request.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.realtime.validate()?;
        self.lock.validate()?;
        self.auth.validate()?;
        self.instance.validate()?;

        match &self.redis {
            Some(redis) => redis.validate()?,
            None if self.requires_redis() => {
                return Err(ValidationError::MissingRequired("REDIS_URL"));
            }
            None => {}
        }
        Ok(())
    }

    /// True when a configured component can only run against Redis
    pub fn requires_redis(&self) -> bool {
        self.lock.backend == LockBackend::Redis || self.realtime.bus_enabled
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}
