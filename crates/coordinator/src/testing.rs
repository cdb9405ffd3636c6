//! Shared fakes for unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use agent_core::{
    DatasetDescriptor, DeviceMap, DeviceRecord, Error, PingResponse, Result, TokenResponse,
};
use async_trait::async_trait;
use backend::BackendGateway;
use parking_lot::Mutex;

use crate::transport::Subscriber;

/// Descriptor on `realtime/updates/{id}` at `endpoint`
pub fn descriptor(dataset_id: &str, endpoint: &str) -> DatasetDescriptor {
    let mut descriptor = DatasetDescriptor::bare(dataset_id);
    descriptor.update_topic = Some(format!("realtime/updates/{}", dataset_id));
    descriptor.update_endpoint = Some(endpoint.to_string());
    descriptor
}

/// In-memory backend with scripted responses
#[derive(Default)]
pub struct FakeBackend {
    datasets: Mutex<Vec<DatasetDescriptor>>,
    fetch_failures: AtomicUsize,
    refresh_failures: AtomicUsize,
    pings: Mutex<VecDeque<Result<PingResponse>>>,
    tokens_seen: Mutex<Vec<String>>,
    ping_count: AtomicUsize,
    maps: Mutex<Vec<DeviceMap>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_datasets(&self, datasets: Vec<DatasetDescriptor>) {
        *self.datasets.lock() = datasets;
    }

    pub fn fail_device_fetch(&self, fail: bool) {
        let n = if fail { usize::MAX } else { 0 };
        self.fetch_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_device_fetches(&self, n: usize) {
        self.fetch_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_refreshes(&self, n: usize) {
        self.refresh_failures.store(n, Ordering::SeqCst);
    }

    pub fn push_ping(&self, response: Result<PingResponse>) {
        self.pings.lock().push_back(response);
    }

    /// Tokens passed to every refresh attempt
    pub fn refresh_calls(&self) -> Vec<String> {
        self.tokens_seen.lock().clone()
    }

    pub fn ping_count(&self) -> usize {
        self.ping_count.load(Ordering::SeqCst)
    }

    pub fn maps(&self) -> Vec<DeviceMap> {
        self.maps.lock().clone()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

#[async_trait]
impl BackendGateway for FakeBackend {
    async fn get_device_realtime_datasets(&self, device_id: &str) -> Result<DeviceRecord> {
        if Self::take_failure(&self.fetch_failures) {
            return Err(Error::backend("get_device", "connection refused"));
        }
        Ok(DeviceRecord {
            id: Some(device_id.to_string()),
            realtime_datasets: self.datasets.lock().clone(),
            extra: Default::default(),
        })
    }

    async fn refresh_token(&self, token: &str) -> Result<TokenResponse> {
        let attempt = {
            let mut seen = self.tokens_seen.lock();
            seen.push(token.to_string());
            seen.len()
        };
        if Self::take_failure(&self.refresh_failures) {
            return Err(Error::backend("refresh_token", "service unavailable"));
        }
        Ok(TokenResponse {
            token: format!("token-{}", attempt),
        })
    }

    async fn ping(&self, _device_id: &str) -> Result<PingResponse> {
        self.ping_count.fetch_add(1, Ordering::SeqCst);
        self.pings
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(PingResponse::default()))
    }

    async fn write_device_map(&self, _device_id: &str, map: &DeviceMap) -> Result<()> {
        self.maps.lock().push(map.clone());
        Ok(())
    }
}

/// Subscriber that records topics
#[derive(Default)]
pub struct RecordingSubscriber {
    topics: Mutex<Vec<String>>,
}

impl RecordingSubscriber {
    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().clone()
    }
}

#[async_trait]
impl Subscriber for RecordingSubscriber {
    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.topics.lock().push(topic.to_string());
        Ok(())
    }
}
