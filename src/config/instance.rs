//! Instance identity and discovery registration

use serde::Deserialize;
use std::time::Duration;

use crate::domain::foundation::InstanceId;

use super::error::ValidationError;

/// How this process identifies and advertises itself
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    /// Service name used for discovery registration
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Fixed instance id; generated from hostname and port when absent
    pub instance_id: Option<String>,

    /// Address peers should use to reach this instance
    #[serde(default = "default_advertise_host")]
    pub advertise_host: String,

    /// Seconds between discovery heartbeats
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,

    /// Lifetime of a discovery registration without heartbeat
    #[serde(default = "default_registration_ttl")]
    pub registration_ttl_secs: u64,
}

impl InstanceConfig {
    /// Resolve the instance id, generating one if not configured
    pub fn resolve_instance_id(&self) -> InstanceId {
        match self.instance_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => InstanceId::new(id),
            _ => InstanceId::from_env(),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn registration_ttl(&self) -> Duration {
        Duration::from_secs(self.registration_ttl_secs)
    }

    /// Validate instance configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.service_name.trim().is_empty() {
            return Err(ValidationError::MissingRequired("INSTANCE__SERVICE_NAME"));
        }
        if self.heartbeat_secs == 0 {
            return Err(ValidationError::MustBePositive("instance.heartbeat_secs"));
        }
        if self.registration_ttl_secs <= self.heartbeat_secs {
            return Err(ValidationError::MustBePositive(
                "instance.registration_ttl_secs - instance.heartbeat_secs",
            ));
        }
        Ok(())
    }
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            instance_id: None,
            advertise_host: default_advertise_host(),
            heartbeat_secs: default_heartbeat(),
            registration_ttl_secs: default_registration_ttl(),
        }
    }
}

fn default_service_name() -> String {
    "cardroom-realtime".to_string()
}

fn default_advertise_host() -> String {
    "127.0.0.1".to_string()
}

fn default_heartbeat() -> u64 {
    10
}

fn default_registration_ttl() -> u64 {
    30
}
