//! Heartbeat and token refresh loop

use std::time::Duration;

use agent_core::config::CoordinatorConfig;
use agent_core::{PingResponse, Result, ShutdownHandle};
use backend::{AuthStateHandle, BackendGatewayHandle};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Outcome of one heartbeat tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickOutcome {
    /// The token was replaced this tick
    pub token_refreshed: bool,

    /// The backend asked for a reboot
    pub reboot_requested: bool,
}

/// Periodic ping and token refresh
pub struct HeartbeatLoop {
    device_id: String,
    backend: BackendGatewayHandle,
    auth: AuthStateHandle,
    interval: Duration,
    refresh_threshold: Duration,
    previous: Mutex<Option<PingResponse>>,
}

impl HeartbeatLoop {
    pub fn new(
        device_id: impl Into<String>,
        backend: BackendGatewayHandle,
        auth: AuthStateHandle,
        config: &CoordinatorConfig,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            backend,
            auth,
            interval: config.heartbeat_interval,
            refresh_threshold: config.token_refresh_threshold,
            previous: Mutex::new(None),
        }
    }

    /// Refresh the token if it is older than the threshold
    ///
    /// Returns whether a new token was installed. On failure the refresh
    /// timestamp is left alone so the next tick tries again.
    pub async fn refresh_token_if_stale(&self) -> Result<bool> {
        if !self.auth.is_stale(self.refresh_threshold) {
            return Ok(false);
        }

        let current = self.auth.token();
        let response = self.backend.refresh_token(&current).await?;
        self.auth.replace(response.token);
        Ok(true)
    }

    /// Ping the backend and compare with the previous response
    ///
    /// Returns true when the reboot marker changed since the last ping.
    pub async fn heartbeat(&self) -> Result<bool> {
        let response = self.backend.ping(&self.device_id).await?;
        debug!(response = ?response, "Heartbeat");

        let mut previous = self.previous.lock();
        let reboot = previous
            .as_ref()
            .is_some_and(|before| response.reboot_requested_since(before));
        *previous = Some(response);
        Ok(reboot)
    }

    /// Token refresh then heartbeat; failures are logged, never returned
    pub async fn tick(&self) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        match self.refresh_token_if_stale().await {
            Ok(refreshed) => outcome.token_refreshed = refreshed,
            Err(e) => warn!(error = %e, "Token refresh failed; retrying next tick"),
        }

        match self.heartbeat().await {
            Ok(reboot) => outcome.reboot_requested = reboot,
            Err(e) => warn!(error = %e, "Heartbeat failed"),
        }

        outcome
    }

    /// Tick until shutdown; a reboot request triggers shutdown
    pub async fn run(&self, shutdown: ShutdownHandle) {
        let mut shutdown_rx = shutdown.subscribe();
        debug!(interval_ms = self.interval.as_millis() as u64, "Heartbeat loop started");

        while shutdown.is_running() {
            if self.tick().await.reboot_requested {
                info!("Reboot requested by backend");
                shutdown.trigger("reboot requested");
                break;
            }
            if !shutdown.sleep(&mut shutdown_rx, self.interval).await {
                break;
            }
        }

        info!("Heartbeat loop stopped");
    }
}
