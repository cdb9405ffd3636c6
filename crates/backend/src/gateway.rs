//! Backend gateway trait definition
//!
//! Defines the async request/response contracts the coordinator invokes.

use std::sync::Arc;

use agent_core::{DeviceMap, DeviceRecord, PingResponse, Result, TokenResponse};
use async_trait::async_trait;

/// Async trait for the backend API
///
/// Every call is fallible; callers in the coordinator log failures and retry
/// on their next natural tick.
#[async_trait]
pub trait BackendGateway: Send + Sync {
    /// Fetch the device record together with its realtime datasets
    ///
    /// # Arguments
    /// * `device_id` - Device identifier on the backend
    async fn get_device_realtime_datasets(&self, device_id: &str) -> Result<DeviceRecord>;

    /// Exchange the current token for a fresh one
    ///
    /// # Arguments
    /// * `current_token` - Token presented for renewal
    async fn refresh_token(&self, current_token: &str) -> Result<TokenResponse>;

    /// Send a heartbeat and return the backend's view of the device
    async fn ping(&self, device_id: &str) -> Result<PingResponse>;

    /// Push the realtime id -> schema id map for this device
    async fn write_device_map(&self, device_id: &str, mapping: &DeviceMap) -> Result<()>;
}

/// Shared handle to a backend gateway
pub type BackendGatewayHandle = Arc<dyn BackendGateway>;
