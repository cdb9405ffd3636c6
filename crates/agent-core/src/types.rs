//! Core type definitions for the realtime dataset agent

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::{Error, Result};

/// Unique identifier types
pub type DatasetId = String;
pub type DeviceId = String;

/// Lease expiration; `None` means no known expiration
pub type Expiration = Option<DateTime<Utc>>;

/// Realtime dataset metadata as served by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    /// Unique dataset identifier
    #[serde(rename = "id")]
    pub dataset_id: DatasetId,

    /// Topic carrying renewal messages for this dataset
    #[serde(rename = "model_updates_topic", default)]
    pub update_topic: Option<String>,

    /// Broker URL the topic lives on
    #[serde(rename = "model_updates_endpoint", default)]
    pub update_endpoint: Option<String>,

    /// Expiration known at load time
    #[serde(
        rename = "observe_through",
        default,
        deserialize_with = "deserialize_expiration"
    )]
    pub initial_expires_at: Expiration,

    /// Remaining backend fields, kept opaque
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DatasetDescriptor {
    /// Descriptor carrying only an id, for datasets outside the loaded record
    pub fn bare(dataset_id: impl Into<DatasetId>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            update_topic: None,
            update_endpoint: None,
            initial_expires_at: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Returns true if the initial lease is still in the future
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.initial_expires_at.is_some_and(|at| at > now)
    }
}

/// Device record with its realtime datasets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Device identifier
    #[serde(default)]
    pub id: Option<DeviceId>,

    /// Realtime datasets bound to this device
    #[serde(default)]
    pub realtime_datasets: Vec<DatasetDescriptor>,

    /// Remaining backend fields, kept opaque
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Response of a token refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Heartbeat response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PingResponse {
    /// Marker whose change between heartbeats requests a reboot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reboot_request: Option<serde_json::Value>,

    /// Remaining backend fields, kept opaque
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PingResponse {
    /// Returns true if both responses carry a reboot marker and it changed
    pub fn reboot_requested_since(&self, previous: &PingResponse) -> bool {
        match (&previous.reboot_request, &self.reboot_request) {
            (Some(before), Some(after)) => before != after,
            _ => false,
        }
    }
}

/// One realtime id -> schema id binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMapEntry {
    pub realtime_id: String,
    pub schema_id: String,
}

/// Body of the device map write
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMap {
    pub devices: Vec<DeviceMapEntry>,
}

impl DeviceMap {
    /// Build the wire payload from a realtime id -> schema id map
    pub fn from_pairs(map: &BTreeMap<String, String>) -> Self {
        Self {
            devices: map
                .iter()
                .map(|(realtime_id, schema_id)| DeviceMapEntry {
                    realtime_id: realtime_id.clone(),
                    schema_id: schema_id.clone(),
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// A decoded renewal message
#[derive(Debug, Clone, PartialEq)]
pub struct RenewalMessage {
    /// Dataset the message is about (last topic segment)
    pub dataset_id: DatasetId,

    /// `None` if the payload carried no expiration field at all,
    /// `Some(None)` if it carried an explicit null
    pub expiration: Option<Expiration>,
}

impl RenewalMessage {
    /// Decode a renewal message from its topic and JSON payload
    pub fn parse(topic: &str, payload: &[u8]) -> Result<Self> {
        let malformed = |reason: String| Error::MalformedMessage {
            topic: topic.to_string(),
            reason,
        };

        let dataset_id = dataset_id_from_topic(topic)
            .ok_or_else(|| malformed("topic has no dataset segment".to_string()))?;

        let value: serde_json::Value =
            serde_json::from_slice(payload).map_err(|e| malformed(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| malformed("payload is not a JSON object".to_string()))?;

        let expiration = match object.get("observe_through") {
            None => None,
            Some(serde_json::Value::Null) => Some(None),
            Some(serde_json::Value::String(raw)) => {
                let at = parse_timestamp(raw).map_err(|e| malformed(e.to_string()))?;
                Some(Some(at))
            }
            Some(other) => {
                return Err(malformed(format!("unexpected observe_through: {}", other)));
            }
        };

        Ok(Self {
            dataset_id: dataset_id.to_string(),
            expiration,
        })
    }
}

/// Extract the dataset id from a topic: its last `/` segment
pub fn dataset_id_from_topic(topic: &str) -> Option<&str> {
    topic.rsplit('/').next().filter(|segment| !segment.is_empty())
}

/// Parse an RFC 3339 or naive ISO-8601 timestamp (naive values are UTC)
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(Error::InvalidTimestamp {
        value: raw.to_string(),
    })
}

fn deserialize_expiration<'de, D>(deserializer: D) -> std::result::Result<Expiration, D::Error>
where
    D: Deserializer<'de>,
{
    // A bad value drops the expiry instead of failing the whole device record
    let raw = serde_json::Value::deserialize(deserializer)?;
    let expiration = match raw {
        serde_json::Value::Null => None,
        serde_json::Value::String(raw) => match parse_timestamp(&raw) {
            Ok(at) => Some(at),
            Err(e) => {
                warn!(error = %e, "Ignoring unparseable observe_through");
                None
            }
        },
        other => {
            warn!(value = %other, "Ignoring non-string observe_through");
            None
        }
    };
    Ok(expiration)
}
