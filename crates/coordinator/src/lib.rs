//! Realtime dataset agent coordinator
//!
//! This crate runs the device side of realtime dataset collection:
//! - **Subscriptions**: one broker connection per device, one topic per dataset
//! - **Leases**: renewal messages start and stop collection
//! - **Expiration**: a fast monitor stops collection when a lease lapses
//! - **Heartbeat**: periodic ping, token refresh and remote reboot detection
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use coordinator::{Coordinator, MqttTransport};
//!
//! let transport = Arc::new(MqttTransport::new(config.broker.clone(), &device_id));
//! let coordinator = Coordinator::new(config, backend, auth, device, transport);
//! coordinator.run().await?;
//! ```

pub mod coordinator;
pub mod expiration;
pub mod heartbeat;
pub mod loopback;
pub mod mqtt;
pub mod subscription;
pub mod transport;

#[cfg(test)]
mod testing;

pub use coordinator::Coordinator;
pub use expiration::ExpirationMonitor;
pub use heartbeat::{HeartbeatLoop, TickOutcome};
pub use loopback::LoopbackTransport;
pub use mqtt::MqttTransport;
pub use subscription::{ConnectionState, SubscriptionManager};
pub use transport::{
    BrokerEndpoint, DisconnectReason, PubSubTransport, PubSubTransportHandle, Subscriber,
    TransportListener,
};
