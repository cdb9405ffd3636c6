//! Agent configuration types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::{Error, Result};

/// Main agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Backend API settings
    pub backend: BackendConfig,

    /// Device identity and mode
    pub device: DeviceConfig,

    /// Background loop settings
    pub coordinator: CoordinatorConfig,

    /// Pub/sub broker settings
    pub broker: BrokerConfig,
}

impl AgentConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: AgentConfig = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Check that the configuration can drive an agent
    pub fn validate(&self) -> Result<()> {
        if self.backend.host.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "backend host is required".to_string(),
            });
        }
        if self.backend.token.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "auth token is required".to_string(),
            });
        }
        if self.device.device_id.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "device id is required".to_string(),
            });
        }
        if self.coordinator.expiration_check_interval.is_zero()
            || self.coordinator.heartbeat_interval.is_zero()
        {
            return Err(Error::InvalidConfig {
                message: "loop intervals must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Backend API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// API host name, e.g. api.example.com
    pub host: String,

    /// URL scheme used to reach the host
    pub scheme: String,

    /// API version sent in the Accept header
    pub api_version: String,

    /// Initial device token
    pub token: String,

    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            scheme: "https".to_string(),
            api_version: "1.1".to_string(),
            token: String::new(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl BackendConfig {
    /// Base URL every API path is joined onto
    pub fn base_url(&self) -> String {
        format!("{}://{}/", self.scheme, self.host.trim_end_matches('/'))
    }
}

/// Device configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device identifier on the backend
    pub device_id: String,

    /// Collect every dataset regardless of leases
    pub continuous: bool,

    /// Use the simulated device instead of hardware
    pub simulated: bool,

    /// Realtime id -> schema id map pushed once at startup
    pub schema_map: BTreeMap<String, String>,
}

/// Coordinator loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// How often the expiration monitor scans the lease table
    #[serde(with = "humantime_serde")]
    pub expiration_check_interval: Duration,

    /// How often the heartbeat loop ticks
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    /// Age after which the auth token is refreshed
    #[serde(with = "humantime_serde")]
    pub token_refresh_threshold: Duration,

    /// Delay between attempts to load datasets at startup
    #[serde(with = "humantime_serde")]
    pub startup_retry_delay: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            expiration_check_interval: Duration::from_millis(10),
            heartbeat_interval: Duration::from_secs(60),
            token_refresh_threshold: Duration::from_secs(10 * 60),
            startup_retry_delay: Duration::from_secs(5),
        }
    }
}

/// Pub/sub broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker port (websockets over TLS)
    pub port: u16,

    /// MQTT keep-alive interval
    #[serde(with = "humantime_serde")]
    pub keep_alive: Duration,

    /// Delay between reconnect attempts
    #[serde(with = "humantime_serde")]
    pub reconnect_delay: Duration,

    /// Prefix for the generated MQTT client id
    pub client_id_prefix: String,

    /// Capacity of the outgoing request channel
    pub channel_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            port: 443,
            keep_alive: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(1),
            client_id_prefix: "device".to_string(),
            channel_capacity: 64,
        }
    }
}

/// Duration serialization helper for human-readable formats
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
