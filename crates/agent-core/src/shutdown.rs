//! Cooperative shutdown signalling
//!
//! Background loops check [`Shutdown::is_running`] once per iteration and
//! wait on a [`ShutdownReceiver`] between iterations so a trigger wakes them
//! early. A loop always finishes the tick it is in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

/// Shutdown signal receiver
pub type ShutdownReceiver = broadcast::Receiver<()>;

/// Shared running flag plus wake-up channel
#[derive(Debug)]
pub struct Shutdown {
    running: AtomicBool,
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    /// Create a signal in the running state
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            running: AtomicBool::new(true),
            tx,
        }
    }

    /// Returns true until shutdown has been triggered
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get a receiver woken when shutdown is triggered
    pub fn subscribe(&self) -> ShutdownReceiver {
        self.tx.subscribe()
    }

    /// Clear the running flag and wake every waiting loop
    ///
    /// Returns false if shutdown had already been triggered.
    pub fn trigger(&self, reason: &str) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        info!(reason = reason, "Initiating agent shutdown");
        let _ = self.tx.send(());
        true
    }

    /// Sleep for `interval` unless shutdown is triggered first
    ///
    /// Returns false if the sleep was cut short by shutdown.
    pub async fn sleep(&self, rx: &mut ShutdownReceiver, interval: Duration) -> bool {
        if !self.is_running() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => self.is_running(),
            _ = rx.recv() => false,
        }
    }

    /// Wait until shutdown is triggered
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        while self.is_running() {
            if rx.recv().await.is_err() {
                break;
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe handle to the shutdown signal
pub type ShutdownHandle = Arc<Shutdown>;
