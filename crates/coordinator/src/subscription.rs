//! Subscription manager
//!
//! Owns the dataset descriptor set and the connection state, subscribes to
//! every dataset's update topic on connect, refreshes the broker endpoint
//! while the transport retries, and turns renewal messages into lease
//! transitions.

use std::sync::atomic::{AtomicU64, Ordering};

use agent_core::{
    DatasetDescriptor, Error, Expiration, LeaseTableHandle, LeaseTransition, RenewalMessage,
    Result,
};
use async_trait::async_trait;
use backend::BackendGatewayHandle;
use chrono::Utc;
use device::CollectionControllerHandle;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::transport::{BrokerEndpoint, DisconnectReason, Subscriber, TransportListener};

/// Connection state as seen by the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Pub/sub side of the coordinator
pub struct SubscriptionManager {
    /// Device whose datasets are tracked
    device_id: String,

    /// Backend used to refresh descriptors
    backend: BackendGatewayHandle,

    /// Shared lease table
    leases: LeaseTableHandle,

    /// Collection control
    controller: CollectionControllerHandle,

    /// Latest descriptor set from the backend
    descriptors: RwLock<Vec<DatasetDescriptor>>,

    /// Current connection state
    state: RwLock<ConnectionState>,

    /// Messages dropped as malformed
    dropped: AtomicU64,
}

impl SubscriptionManager {
    /// Create a manager for a loaded descriptor set
    pub fn new(
        device_id: impl Into<String>,
        backend: BackendGatewayHandle,
        leases: LeaseTableHandle,
        controller: CollectionControllerHandle,
        descriptors: Vec<DatasetDescriptor>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            backend,
            leases,
            controller,
            descriptors: RwLock::new(descriptors),
            state: RwLock::new(ConnectionState::Disconnected),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    /// Copy of the current descriptor set
    pub fn descriptors(&self) -> Vec<DatasetDescriptor> {
        self.descriptors.read().clone()
    }

    /// Number of malformed messages dropped so far
    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Descriptor for a dataset, or a bare one if it is not in the set
    pub fn descriptor(&self, dataset_id: &str) -> DatasetDescriptor {
        self.descriptors
            .read()
            .iter()
            .find(|d| d.dataset_id == dataset_id)
            .cloned()
            .unwrap_or_else(|| DatasetDescriptor::bare(dataset_id))
    }

    /// Broker endpoint shared by all datasets of this device
    ///
    /// Taken from the first descriptor that declares one.
    pub fn endpoint(&self) -> Result<BrokerEndpoint> {
        let descriptors = self.descriptors.read();
        let raw = descriptors
            .iter()
            .find_map(|d| d.update_endpoint.as_deref())
            .ok_or_else(|| Error::NoRealtimeDatasets {
                device_id: self.device_id.clone(),
            })?;
        BrokerEndpoint::parse(raw)
    }

    /// Mark a connection attempt in progress
    pub fn begin_connect(&self) {
        self.set_state(ConnectionState::Connecting);
    }

    /// Apply a renewal to the lease table, then start or stop collection
    ///
    /// The table decision is made under its lock; the device call happens
    /// after the lock is released.
    pub async fn process_expiration(
        &self,
        dataset_id: &str,
        expires_at: Expiration,
    ) -> LeaseTransition {
        let transition = self.leases.apply_renewal(dataset_id, expires_at, Utc::now());

        match transition {
            LeaseTransition::Started => {
                info!(dataset_id, expires_at = ?expires_at, "Lease started");
                self.controller.start(&self.descriptor(dataset_id)).await;
            }
            LeaseTransition::Stopped => {
                info!(dataset_id, expires_at = ?expires_at, "Lease lapsed");
                self.controller.stop(&self.descriptor(dataset_id)).await;
            }
            LeaseTransition::Renewed => {
                debug!(dataset_id, expires_at = ?expires_at, "Lease renewed");
            }
            LeaseTransition::Ignored => {
                debug!(dataset_id, "Expiration for untracked dataset ignored");
            }
        }

        transition
    }

    /// Decode a message and apply it; `None` if it carried no expiration
    pub async fn handle_message(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Result<Option<LeaseTransition>> {
        let message = RenewalMessage::parse(topic, payload)?;
        info!(
            dataset_id = %message.dataset_id,
            payload = %String::from_utf8_lossy(payload),
            "Model update received"
        );

        match message.expiration {
            Some(expires_at) => Ok(Some(
                self.process_expiration(&message.dataset_id, expires_at).await,
            )),
            None => Ok(None),
        }
    }

    /// Re-fetch descriptors from the backend and return the fresh endpoint
    pub async fn refresh_descriptors(&self) -> Result<BrokerEndpoint> {
        let record = self
            .backend
            .get_device_realtime_datasets(&self.device_id)
            .await?;
        let count = record.realtime_datasets.len();
        *self.descriptors.write() = record.realtime_datasets;
        debug!(datasets = count, "Realtime dataset descriptors refreshed");
        self.endpoint()
    }
}

#[async_trait]
impl TransportListener for SubscriptionManager {
    async fn on_connect(&self, subscriber: &dyn Subscriber) {
        self.set_state(ConnectionState::Connected);

        let topics: Vec<(String, String)> = self
            .descriptors
            .read()
            .iter()
            .filter_map(|d| {
                d.update_topic
                    .as_ref()
                    .map(|topic| (d.dataset_id.clone(), topic.clone()))
            })
            .collect();

        for (dataset_id, topic) in &topics {
            match subscriber.subscribe(topic).await {
                Ok(()) => info!(
                    dataset_id = %dataset_id,
                    topic = %topic,
                    "Subscribing to realtime updates"
                ),
                Err(e) => error!(dataset_id = %dataset_id, error = %e, "Subscribe failed"),
            }
        }
        info!(topics = topics.len(), "Connected; waiting for updates");
    }

    async fn on_disconnect(&self, reason: &DisconnectReason) {
        if reason.is_unexpected() {
            self.set_state(ConnectionState::Connecting);
            warn!(code = reason.code(), reason = ?reason, "Unexpected disconnect; reconnecting");
        } else {
            self.set_state(ConnectionState::Disconnected);
            info!("Disconnected from realtime endpoint");
        }
    }

    async fn on_message(&self, topic: &str, payload: &[u8]) {
        if let Err(e) = self.handle_message(topic, payload).await {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(topic, error = %e, "Dropping realtime message");
        }
    }

    async fn on_reconnecting(&self, detail: &str) -> Option<BrokerEndpoint> {
        self.set_state(ConnectionState::Connecting);
        info!(detail, "Connection retry in progress; refreshing endpoint");

        match self.refresh_descriptors().await {
            Ok(endpoint) => {
                info!(endpoint = %endpoint, "Reconnect will use refreshed endpoint");
                Some(endpoint)
            }
            Err(e) => {
                warn!(error = %e, "Failed to refresh realtime endpoint");
                None
            }
        }
    }
}
