//! Device capability trait definition

use std::sync::Arc;

use agent_core::{DatasetDescriptor, Result};
use async_trait::async_trait;

/// Async trait for collection-capable devices
///
/// Implementors start and stop acquisition for one realtime dataset at a
/// time. Both operations are best effort: the controller logs failures and
/// carries on with other datasets.
#[async_trait]
pub trait Device: Send + Sync {
    /// Short name used in log fields
    fn kind(&self) -> &str;

    /// Begin collecting data for the dataset
    async fn start_collection(&self, dataset: &DatasetDescriptor) -> Result<()>;

    /// Stop collecting data for the dataset
    async fn stop_collection(&self, dataset: &DatasetDescriptor) -> Result<()>;
}

/// Shared handle to a device
pub type DeviceHandle = Arc<dyn Device>;
