//! Simulated device
//!
//! Generates synthetic samples for every collecting dataset on a fixed
//! cadence. Used for bench setups without acquisition hardware.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_core::{DatasetDescriptor, DatasetId, Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, trace};

use crate::Device;

/// One running synthetic stream
struct SimulatedStream {
    stop_tx: oneshot::Sender<()>,
    samples: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

/// Device producing synthetic samples in a background task per dataset
pub struct SimulatedDevice {
    sample_interval: Duration,
    streams: DashMap<DatasetId, SimulatedStream>,
}

impl SimulatedDevice {
    /// Create a simulated device emitting one sample per `sample_interval`
    pub fn new(sample_interval: Duration) -> Self {
        Self {
            sample_interval,
            streams: DashMap::new(),
        }
    }

    /// Samples produced so far for a running dataset
    pub fn samples(&self, dataset_id: &str) -> Option<u64> {
        self.streams
            .get(dataset_id)
            .map(|stream| stream.samples.load(Ordering::Relaxed))
    }

    /// Ids of every running stream
    pub fn running(&self) -> Vec<DatasetId> {
        self.streams.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

#[async_trait]
impl Device for SimulatedDevice {
    fn kind(&self) -> &str {
        "simulated"
    }

    async fn start_collection(&self, dataset: &DatasetDescriptor) -> Result<()> {
        let dataset_id = dataset.dataset_id.clone();
        if self.streams.contains_key(&dataset_id) {
            return Err(Error::device(dataset_id, "simulated stream already running"));
        }

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let samples = Arc::new(AtomicU64::new(0));
        let interval = self.sample_interval;

        let task = {
            let samples = Arc::clone(&samples);
            let dataset_id = dataset_id.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let n = samples.fetch_add(1, Ordering::Relaxed) + 1;
                            trace!(dataset_id = %dataset_id, sample = n, "Synthetic sample");
                        }
                        _ = &mut stop_rx => break,
                    }
                }
            })
        };

        self.streams.insert(
            dataset_id.clone(),
            SimulatedStream {
                stop_tx,
                samples,
                task,
            },
        );
        info!(dataset_id = %dataset_id, "Simulated stream started");
        Ok(())
    }

    async fn stop_collection(&self, dataset: &DatasetDescriptor) -> Result<()> {
        let Some((dataset_id, stream)) = self.streams.remove(&dataset.dataset_id) else {
            return Err(Error::device(
                dataset.dataset_id.clone(),
                "no simulated stream running",
            ));
        };

        let _ = stream.stop_tx.send(());
        stream
            .task
            .await
            .map_err(|e| Error::device(dataset_id.clone(), e))?;

        info!(
            dataset_id = %dataset_id,
            samples = stream.samples.load(Ordering::Relaxed),
            "Simulated stream stopped"
        );
        Ok(())
    }
}
