//! Expiration monitor
//!
//! Polls the lease table at a fixed short interval and stops collection for
//! every lease whose expiration has passed.

use std::time::Duration;

use agent_core::{DatasetId, LeaseTableHandle, ShutdownHandle};
use chrono::{DateTime, Utc};
use device::CollectionControllerHandle;
use tracing::{debug, info};

/// Background lease expiry scanner
pub struct ExpirationMonitor {
    leases: LeaseTableHandle,
    controller: CollectionControllerHandle,
    interval: Duration,
}

impl ExpirationMonitor {
    pub fn new(
        leases: LeaseTableHandle,
        controller: CollectionControllerHandle,
        interval: Duration,
    ) -> Self {
        Self {
            leases,
            controller,
            interval,
        }
    }

    /// One scan: remove lapsed leases, then stop their collection
    ///
    /// Entries leave the table under its lock, so a renewal racing with the
    /// scan either lands first and is honoured or finds the entry gone. A
    /// renewal that lands while its dataset is still waiting to be stopped
    /// re-tracks it, so collection is restarted after the stop.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<DatasetId> {
        let expired = self.leases.take_expired(now);
        for dataset_id in &expired {
            info!(dataset_id = %dataset_id, "Lease expired; stopping collection");
            let Some(descriptor) = self.controller.stop_by_id(dataset_id).await else {
                continue;
            };
            if self.leases.contains(dataset_id) {
                info!(
                    dataset_id = %dataset_id,
                    "Lease renewed during expiry; restarting collection"
                );
                self.controller.start(&descriptor).await;
            }
        }
        expired
    }

    /// Scan until shutdown
    pub async fn run(&self, shutdown: ShutdownHandle) {
        let mut shutdown_rx = shutdown.subscribe();
        debug!(interval_ms = self.interval.as_millis() as u64, "Expiration monitor started");

        while shutdown.is_running() {
            self.tick(Utc::now()).await;
            if !shutdown.sleep(&mut shutdown_rx, self.interval).await {
                break;
            }
        }

        info!("Expiration monitor stopped");
    }
}
