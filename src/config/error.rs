//! Configuration errors, raised once at startup.

use thiserror::Error;

/// The environment could not be read into an [`AppConfig`](super::AppConfig).
#[derive(Debug, Error)]
#[error("cannot read configuration: {0}")]
pub struct ConfigError(#[from] config::ConfigError);

/// A loaded value that the service cannot run with.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingRequired(&'static str),

    #[error("server.port must not be 0")]
    InvalidPort,

    #[error("server.request_timeout_secs must be between 1 and 300")]
    InvalidTimeout,

    #[error("cannot bind to {0}")]
    InvalidBindAddress(String),

    #[error("redis.url must use the redis:// or rediss:// scheme")]
    InvalidRedisUrl,

    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),

    #[error("lock.retention_secs must cover at least one sweep interval")]
    RetentionShorterThanSweep,
}
