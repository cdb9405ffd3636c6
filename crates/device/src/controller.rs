//! Collection controller
//!
//! Tracks which datasets the agent believes are collecting and forwards
//! transitions to the device exactly once per transition.

use std::sync::Arc;

use agent_core::{DatasetDescriptor, DatasetId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, error, info};

use crate::DeviceHandle;

/// Idempotent start/stop front for a device
pub struct CollectionController {
    /// Device capability
    device: DeviceHandle,

    /// Datasets currently collecting, with the descriptor they were started with
    active: DashMap<DatasetId, DatasetDescriptor>,
}

impl CollectionController {
    /// Create a controller for a device
    pub fn new(device: DeviceHandle) -> Self {
        Self {
            device,
            active: DashMap::new(),
        }
    }

    /// Start collection for a dataset
    ///
    /// Returns true if the device was asked to start. A dataset that is
    /// already collecting is left untouched. Device errors are logged.
    pub async fn start(&self, descriptor: &DatasetDescriptor) -> bool {
        let dataset_id = descriptor.dataset_id.as_str();

        let newly_active = match self.active.entry(dataset_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(descriptor.clone());
                true
            }
        };

        if !newly_active {
            debug!(dataset_id, "Collection already running");
            return false;
        }

        match self.device.start_collection(descriptor).await {
            Ok(()) => info!(dataset_id, device = self.device.kind(), "Collection started"),
            Err(e) => error!(
                dataset_id,
                device = self.device.kind(),
                error = %e,
                "Failed to start collection"
            ),
        }
        true
    }

    /// Stop collection for a dataset
    ///
    /// Returns true if the device was asked to stop. A dataset that is not
    /// collecting is left untouched. Device errors are logged.
    pub async fn stop(&self, descriptor: &DatasetDescriptor) -> bool {
        let dataset_id = descriptor.dataset_id.as_str();

        let Some((_, started_with)) = self.active.remove(dataset_id) else {
            debug!(dataset_id, "Collection already stopped");
            return false;
        };

        match self.device.stop_collection(&started_with).await {
            Ok(()) => info!(dataset_id, device = self.device.kind(), "Collection stopped"),
            Err(e) => error!(
                dataset_id,
                device = self.device.kind(),
                error = %e,
                "Failed to stop collection"
            ),
        }
        true
    }

    /// Stop collection for a dataset known only by id
    ///
    /// Returns the descriptor the dataset was started with if it was stopped.
    pub async fn stop_by_id(&self, dataset_id: &str) -> Option<DatasetDescriptor> {
        let descriptor = self
            .active
            .get(dataset_id)
            .map(|entry| entry.value().clone())?;
        self.stop(&descriptor).await.then_some(descriptor)
    }

    /// Start collection for every given dataset, returning how many started
    pub async fn start_all(&self, descriptors: &[DatasetDescriptor]) -> usize {
        let mut started = 0;
        for descriptor in descriptors {
            if self.start(descriptor).await {
                started += 1;
            }
        }
        started
    }

    /// Stop every running collection, returning how many stopped
    pub async fn stop_all(&self) -> usize {
        let running: Vec<DatasetDescriptor> = self
            .active
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut stopped = 0;
        for descriptor in &running {
            if self.stop(descriptor).await {
                stopped += 1;
            }
        }
        stopped
    }

    /// Returns true if the dataset is collecting
    pub fn is_collecting(&self, dataset_id: &str) -> bool {
        self.active.contains_key(dataset_id)
    }

    /// Ids of every collecting dataset
    pub fn active(&self) -> Vec<DatasetId> {
        self.active.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// Thread-safe handle to the collection controller
pub type CollectionControllerHandle = Arc<CollectionController>;
