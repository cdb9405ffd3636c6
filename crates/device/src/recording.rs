//! In-memory device for tests and dry runs

use std::collections::HashSet;

use agent_core::{DatasetDescriptor, Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::Device;

/// A call observed by the recording device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Start(String),
    Stop(String),
}

/// Device that records every call and can be told to fail
#[derive(Debug, Default)]
pub struct RecordingDevice {
    calls: Mutex<Vec<DeviceCall>>,
    fail_start: Mutex<HashSet<String>>,
    fail_stop: Mutex<HashSet<String>>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make start_collection fail for a dataset
    pub fn fail_start_for(&self, dataset_id: &str) {
        self.fail_start.lock().insert(dataset_id.to_string());
    }

    /// Make stop_collection fail for a dataset
    pub fn fail_stop_for(&self, dataset_id: &str) {
        self.fail_stop.lock().insert(dataset_id.to_string());
    }

    /// Every call in the order it was made
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls.lock().clone()
    }

    pub fn start_count(&self, dataset_id: &str) -> usize {
        self.count(&DeviceCall::Start(dataset_id.to_string()))
    }

    pub fn stop_count(&self, dataset_id: &str) -> usize {
        self.count(&DeviceCall::Stop(dataset_id.to_string()))
    }

    fn count(&self, call: &DeviceCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }
}

#[async_trait]
impl Device for RecordingDevice {
    fn kind(&self) -> &str {
        "recording"
    }

    async fn start_collection(&self, dataset: &DatasetDescriptor) -> Result<()> {
        let id = dataset.dataset_id.clone();
        self.calls.lock().push(DeviceCall::Start(id.clone()));
        if self.fail_start.lock().contains(&id) {
            return Err(Error::device(id, "injected start failure"));
        }
        Ok(())
    }

    async fn stop_collection(&self, dataset: &DatasetDescriptor) -> Result<()> {
        let id = dataset.dataset_id.clone();
        self.calls.lock().push(DeviceCall::Stop(id.clone()));
        if self.fail_stop.lock().contains(&id) {
            return Err(Error::device(id, "injected stop failure"));
        }
        Ok(())
    }
}
