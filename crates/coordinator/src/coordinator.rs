//! Coordinator composition root
//!
//! Loads the device's realtime datasets, seeds leases, then runs the
//! transport, the expiration monitor and the heartbeat loop until shutdown.

use std::sync::Arc;

use agent_core::{
    AgentConfig, DatasetDescriptor, DeviceMap, LeaseTable, LeaseTableHandle, Result, Shutdown,
    ShutdownHandle,
};
use backend::{AuthStateHandle, BackendGatewayHandle};
use chrono::Utc;
use device::{CollectionController, CollectionControllerHandle, DeviceHandle};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::expiration::ExpirationMonitor;
use crate::heartbeat::HeartbeatLoop;
use crate::subscription::SubscriptionManager;
use crate::transport::{PubSubTransportHandle, TransportListener};

/// Realtime dataset agent
pub struct Coordinator {
    config: AgentConfig,
    backend: BackendGatewayHandle,
    auth: AuthStateHandle,
    transport: PubSubTransportHandle,
    leases: LeaseTableHandle,
    controller: CollectionControllerHandle,
    shutdown: ShutdownHandle,
}

impl Coordinator {
    pub fn new(
        config: AgentConfig,
        backend: BackendGatewayHandle,
        auth: AuthStateHandle,
        device: DeviceHandle,
        transport: PubSubTransportHandle,
    ) -> Self {
        Self {
            config,
            backend,
            auth,
            transport,
            leases: Arc::new(LeaseTable::new()),
            controller: Arc::new(CollectionController::new(device)),
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    /// Signal that stops the agent when triggered
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        Arc::clone(&self.shutdown)
    }

    pub fn leases(&self) -> LeaseTableHandle {
        Arc::clone(&self.leases)
    }

    pub fn controller(&self) -> CollectionControllerHandle {
        Arc::clone(&self.controller)
    }

    fn device_id(&self) -> &str {
        &self.config.device.device_id
    }

    /// Fetch the device's realtime datasets, retrying until shutdown
    ///
    /// Returns `None` if shutdown was triggered before a fetch succeeded.
    async fn load_datasets(&self) -> Result<Option<Vec<DatasetDescriptor>>> {
        let mut shutdown_rx = self.shutdown.subscribe();
        let retry_delay = self.config.coordinator.startup_retry_delay;

        loop {
            match self.backend.get_device_realtime_datasets(self.device_id()).await {
                Ok(record) => {
                    info!(
                        device_id = %self.device_id(),
                        datasets = record.realtime_datasets.len(),
                        "Device record loaded"
                    );
                    return Ok(Some(record.realtime_datasets));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_ms = retry_delay.as_millis() as u64,
                        "Failed to load device record"
                    );
                }
            }

            if !self.shutdown.sleep(&mut shutdown_rx, retry_delay).await {
                return Ok(None);
            }
        }
    }

    async fn write_device_map(&self) {
        let map = DeviceMap::from_pairs(&self.config.device.schema_map);
        if map.is_empty() {
            return;
        }
        match self.backend.write_device_map(self.device_id(), &map).await {
            Ok(()) => info!(entries = map.devices.len(), "Device map written"),
            Err(e) => warn!(error = %e, "Failed to write device map"),
        }
    }

    /// Start collection for datasets whose lease is already running
    async fn seed_leases(&self, descriptors: &[DatasetDescriptor]) -> usize {
        let now = Utc::now();
        let mut started = 0;

        for descriptor in descriptors {
            info!(
                dataset_id = %descriptor.dataset_id,
                observe_through = ?descriptor.initial_expires_at,
                "Dataset loaded"
            );
            if !descriptor.is_active_at(now) {
                continue;
            }
            if self
                .leases
                .insert_if_absent(&descriptor.dataset_id, descriptor.initial_expires_at)
            {
                self.controller.start(descriptor).await;
                started += 1;
            }
        }
        started
    }

    /// Collect every dataset with leases that never expire
    ///
    /// Load-time expirations are ignored.
    async fn start_continuous(&self, descriptors: &[DatasetDescriptor]) -> usize {
        for descriptor in descriptors {
            self.leases.upsert(&descriptor.dataset_id, None);
        }
        self.controller.start_all(descriptors).await
    }

    /// Run the agent until shutdown, then stop all collection
    #[instrument(skip(self), fields(device_id = %self.config.device.device_id))]
    pub async fn run(&self) -> Result<()> {
        let Some(descriptors) = self.load_datasets().await? else {
            info!("Shutdown before startup completed");
            return Ok(());
        };

        self.write_device_map().await;

        let continuous = self.config.device.continuous;
        if continuous {
            let started = self.start_continuous(&descriptors).await;
            info!(started, "Continuous collection started");
        } else {
            let seeded = self.seed_leases(&descriptors).await;
            info!(seeded, "Realtime dataset monitor starting");
        }

        let manager = Arc::new(SubscriptionManager::new(
            self.device_id(),
            Arc::clone(&self.backend),
            Arc::clone(&self.leases),
            Arc::clone(&self.controller),
            descriptors,
        ));

        let mut tasks: Vec<(&str, JoinHandle<()>)> = Vec::new();

        match manager.endpoint() {
            Ok(endpoint) => {
                manager.begin_connect();
                let transport = Arc::clone(&self.transport);
                let listener: Arc<dyn TransportListener> = manager.clone();
                let shutdown = self.shutdown_handle();
                tasks.push((
                    "transport",
                    tokio::spawn(async move {
                        if let Err(e) = transport.run(endpoint, listener, shutdown).await {
                            error!(error = %e, "Realtime transport failed");
                        }
                    }),
                ));
            }
            Err(e) => warn!(error = %e, "No realtime endpoint; not subscribing"),
        }

        if !continuous {
            let monitor = ExpirationMonitor::new(
                Arc::clone(&self.leases),
                Arc::clone(&self.controller),
                self.config.coordinator.expiration_check_interval,
            );
            let shutdown = self.shutdown_handle();
            tasks.push(("monitor", tokio::spawn(async move { monitor.run(shutdown).await })));
        }

        let heartbeat = HeartbeatLoop::new(
            self.device_id(),
            Arc::clone(&self.backend),
            Arc::clone(&self.auth),
            &self.config.coordinator,
        );
        let shutdown = self.shutdown_handle();
        tasks.push(("heartbeat", tokio::spawn(async move { heartbeat.run(shutdown).await })));

        self.shutdown.wait().await;

        for (name, task) in tasks {
            if let Err(e) = task.await {
                error!(task = name, error = %e, "Task ended abnormally");
            }
        }

        let drained = self.leases.drain();
        let stopped = self.controller.stop_all().await;
        info!(leases = drained.len(), stopped, "Agent stopped");
        Ok(())
    }
}
