//! Lock provider configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Which lock provider backs `with_lock`
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    /// In-process locks; only safe with a single instance
    #[default]
    Local,
    /// Redis `SET NX PX` locks shared by all instances
    Redis,
}

/// Lock provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    #[serde(default)]
    pub backend: LockBackend,

    /// Namespace prepended to every Redis lock key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Lease length in milliseconds
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,

    /// Total acquisition attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause between attempts in milliseconds
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// How often the local lock arena is swept
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Idle time after which an unheld local lock entry is dropped
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
}

impl LockConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Validate lock configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.default_ttl_ms == 0 {
            return Err(ValidationError::MustBePositive("lock.default_ttl_ms"));
        }
        if self.max_retries == 0 {
            return Err(ValidationError::MustBePositive("lock.max_retries"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ValidationError::MustBePositive("lock.sweep_interval_secs"));
        }
        if self.retention_secs < self.sweep_interval_secs {
            return Err(ValidationError::RetentionShorterThanSweep);
        }
        Ok(())
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: LockBackend::default(),
            key_prefix: default_key_prefix(),
            default_ttl_ms: default_ttl_ms(),
            max_retries: default_max_retries(),
            retry_interval_ms: default_retry_interval_ms(),
            sweep_interval_secs: default_sweep_interval(),
            retention_secs: default_retention(),
        }
    }
}

fn default_key_prefix() -> String {
    "lock:".to_string()
}

fn default_ttl_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_interval_ms() -> u64 {
    100
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_retention() -> u64 {
    300
}
