//! Agent binary entry point
//!
//! Connects a device to its realtime datasets and runs until the backend
//! requests a reboot or the process is signalled.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{AgentConfig, Error, ShutdownHandle};
use backend::{AuthState, HttpBackend};
use coordinator::{Coordinator, MqttTransport};
use device::{DeviceHandle, SimulatedDevice};

/// Run a device agent for realtime datasets
#[derive(Debug, Parser)]
#[command(name = "agent", version)]
struct Args {
    /// API host name, e.g. api.example.com
    #[arg(long)]
    host: Option<String>,

    /// Device token issued by the platform
    #[arg(long, env = "AGENT_TOKEN")]
    token: Option<String>,

    /// Device id
    #[arg(long)]
    id: Option<String>,

    /// Collect every dataset continuously
    #[arg(long)]
    continuous: bool,

    /// Use a simulated device
    #[arg(long)]
    simulated: bool,

    /// JSON configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> agent_core::Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::from_file(path)?,
            None => AgentConfig::default(),
        };

        if let Some(host) = self.host {
            config.backend.host = host;
        }
        if let Some(token) = self.token {
            config.backend.token = token;
        }
        if let Some(id) = self.id {
            config.device.device_id = id;
        }
        config.device.continuous |= self.continuous;
        config.device.simulated |= self.simulated;

        config.validate()?;
        Ok(config)
    }
}

fn select_device(config: &AgentConfig) -> agent_core::Result<DeviceHandle> {
    if config.device.simulated {
        return Ok(Arc::new(SimulatedDevice::default()));
    }
    Err(Error::InvalidConfig {
        message: "no hardware device is linked into this build; use --simulated".to_string(),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "agent=info,coordinator=info,agent_core=info,backend=info,device=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Args::parse().into_config()?;
    let device = select_device(&config)?;

    let auth = Arc::new(AuthState::new(config.backend.token.clone()));
    let backend = Arc::new(HttpBackend::new(&config.backend, Arc::clone(&auth))?);
    let transport = Arc::new(MqttTransport::new(
        config.broker.clone(),
        &config.device.device_id,
    ));

    info!(
        host = %config.backend.host,
        device_id = %config.device.device_id,
        device = device.kind(),
        continuous = config.device.continuous,
        "Starting agent"
    );

    let coordinator = Coordinator::new(config, backend, auth, device, transport);
    tokio::spawn(shutdown_signal(coordinator.shutdown_handle()));

    if let Err(e) = coordinator.run().await {
        error!(error = %e, "Agent failed");
        return Err(e.into());
    }

    info!("Agent exited");
    Ok(())
}

/// Trigger shutdown on Ctrl+C or SIGTERM
async fn shutdown_signal(shutdown: ShutdownHandle) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            shutdown.trigger("received Ctrl+C");
        }
        _ = terminate => {
            shutdown.trigger("received SIGTERM");
        }
    }
}
