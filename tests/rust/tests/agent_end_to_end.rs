//! End-to-end agent run
//!
//! Drives a coordinator wired to the real HTTP backend (against the fake API)
//! and the loopback transport:
//! - Startup seeding of already-active leases
//! - Renewal and lapse messages over the transport
//! - Expiration of a short lease by the monitor
//! - Endpoint refresh on reconnect
//! - Token refresh and reboot-driven shutdown

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use agent_core::AgentConfig;
use anyhow::Result;
use backend::{AuthState, HttpBackend};
use chrono::{Duration as ChronoDuration, Utc};
use common::{dataset, eventually, start_backend, FakeApi};
use coordinator::{Coordinator, LoopbackTransport};
use device::RecordingDevice;
use serde_json::json;

const ENDPOINT: &str = "wss://broker.example.com/mqtt?sig=1";

struct Agent {
    api: Arc<FakeApi>,
    device: Arc<RecordingDevice>,
    transport: Arc<LoopbackTransport>,
    coordinator: Arc<Coordinator>,
}

async fn start_agent(api: Arc<FakeApi>, tune: impl FnOnce(&mut AgentConfig)) -> Result<Agent> {
    let mut config = AgentConfig {
        backend: start_backend(api.clone()).await?,
        ..Default::default()
    };
    config.device.device_id = "device-1".to_string();
    config.coordinator.heartbeat_interval = Duration::from_millis(50);
    tune(&mut config);
    config.validate()?;

    let auth = Arc::new(AuthState::new(config.backend.token.clone()));
    let backend = Arc::new(HttpBackend::new(&config.backend, auth.clone())?);
    let device = Arc::new(RecordingDevice::new());
    let transport = Arc::new(LoopbackTransport::new());

    let coordinator = Arc::new(Coordinator::new(
        config,
        backend,
        auth,
        device.clone(),
        transport.clone(),
    ));

    Ok(Agent {
        api,
        device,
        transport,
        coordinator,
    })
}

fn in_future(offset: ChronoDuration) -> String {
    (Utc::now() + offset).to_rfc3339()
}

#[tokio::test]
async fn test_lease_lifecycle() -> Result<()> {
    let api = FakeApi::new();
    api.set_datasets(vec![
        dataset("ds-1", ENDPOINT, Some(in_future(ChronoDuration::hours(1)))),
        dataset("ds-2", ENDPOINT, None),
    ]);
    let agent = start_agent(api, |_| {}).await?;

    let run = {
        let coordinator = agent.coordinator.clone();
        tokio::spawn(async move { coordinator.run().await })
    };
    agent.transport.flush().await;

    // Seeded from the device record
    let controller = agent.coordinator.controller();
    assert!(controller.is_collecting("ds-1"));
    assert!(!controller.is_collecting("ds-2"));
    assert_eq!(
        agent.transport.subscriptions(),
        vec!["realtime/updates/ds-1", "realtime/updates/ds-2"]
    );

    // Short lease is started, then stopped by the monitor
    let short = json!({ "observe_through": in_future(ChronoDuration::seconds(1)) });
    agent.transport.publish("realtime/updates/ds-2", short.to_string());
    agent.transport.flush().await;
    assert!(controller.is_collecting("ds-2"));
    assert!(eventually(|| !agent.coordinator.leases().contains("ds-2")).await);
    assert!(eventually(|| agent.device.stop_count("ds-2") == 1).await);

    // Explicit lapse
    agent
        .transport
        .publish("realtime/updates/ds-1", json!({ "observe_through": null }).to_string());
    agent.transport.flush().await;
    assert!(!controller.is_collecting("ds-1"));
    assert_eq!(agent.device.stop_count("ds-1"), 1);

    // Malformed and expiration-free payloads change nothing
    agent.transport.publish("realtime/updates/ds-1", "not json");
    agent
        .transport
        .publish("realtime/updates/ds-1", json!({ "progress": 3 }).to_string());
    agent.transport.flush().await;
    assert_eq!(agent.device.start_count("ds-1"), 1);
    assert!(agent.coordinator.leases().is_empty());

    agent.coordinator.shutdown_handle().trigger("test complete");
    run.await??;
    Ok(())
}

#[tokio::test]
async fn test_reconnect_uses_refreshed_endpoint() -> Result<()> {
    let api = FakeApi::new();
    api.set_datasets(vec![dataset("ds-1", ENDPOINT, None)]);
    let agent = start_agent(api, |_| {}).await?;

    let run = {
        let coordinator = agent.coordinator.clone();
        tokio::spawn(async move { coordinator.run().await })
    };
    agent.transport.flush().await;

    agent.api.set_datasets(vec![dataset(
        "ds-1",
        "wss://broker-2.example.com/mqtt?sig=2",
        None,
    )]);
    agent.transport.drop_connection("connection reset by peer");
    agent.transport.flush().await;

    let endpoints = agent.transport.endpoints();
    assert_eq!(endpoints.len(), 2);
    assert_eq!(endpoints[0].host, "broker.example.com");
    assert_eq!(endpoints[1].host, "broker-2.example.com");
    assert_eq!(endpoints[1].path, "/mqtt?sig=2");
    assert_eq!(agent.transport.subscriptions(), vec!["realtime/updates/ds-1"]);

    // A failed refresh keeps the previous endpoint
    agent.api.fail_devices.store(true, Ordering::SeqCst);
    agent.transport.drop_connection("connection reset by peer");
    agent.transport.flush().await;
    assert_eq!(agent.transport.endpoints()[2].host, "broker-2.example.com");

    agent.coordinator.shutdown_handle().trigger("test complete");
    run.await??;
    Ok(())
}

#[tokio::test]
async fn test_token_refresh_and_reboot_shutdown() -> Result<()> {
    let api = FakeApi::new();
    api.set_datasets(vec![dataset(
        "ds-1",
        ENDPOINT,
        Some(in_future(ChronoDuration::hours(1))),
    )]);
    let agent = start_agent(api.clone(), |config| {
        config.coordinator.token_refresh_threshold = Duration::from_millis(120);
        config
            .device
            .schema_map
            .insert("rt-1".to_string(), "schema-a".to_string());
    })
    .await?;

    let run = {
        let coordinator = agent.coordinator.clone();
        tokio::spawn(async move { coordinator.run().await })
    };
    agent.transport.flush().await;
    assert_eq!(api.maps.lock().len(), 1);

    assert!(eventually(|| !api.refreshed_tokens.lock().is_empty()).await);
    assert_eq!(api.refreshed_tokens.lock()[0], "token-0");
    assert!(
        eventually(|| api
            .requests()
            .iter()
            .any(|r| r.authorization.as_deref() == Some("Bearer token-0-next")))
        .await
    );

    api.set_reboot_marker(Some("a"));
    let seen = api.ping_count();
    assert!(eventually(|| api.ping_count() >= seen + 2).await);
    assert!(agent.coordinator.shutdown_handle().is_running());

    api.set_reboot_marker(Some("b"));
    tokio::time::timeout(Duration::from_secs(5), run).await???;

    assert!(!agent.coordinator.shutdown_handle().is_running());
    assert!(agent.coordinator.leases().is_empty());
    assert_eq!(agent.device.stop_count("ds-1"), 1);
    Ok(())
}
