//! Pub/sub transport seam
//!
//! The transport owns the broker connection and reports every connection
//! event to a single [`TransportListener`]. Listener callbacks for one
//! connection are invoked sequentially, in arrival order.

use std::fmt;
use std::sync::Arc;

use agent_core::{Error, Result, ShutdownHandle};
use async_trait::async_trait;
use reqwest::Url;

/// Broker connection target derived from a dataset's update endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    /// Host (and port, if the URL names one) sent as the Host header
    pub host: String,

    /// Websocket path including the query string
    pub path: String,
}

impl BrokerEndpoint {
    /// Parse an update endpoint URL
    pub fn parse(endpoint: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(endpoint).map_err(|e| invalid(&e.to_string()))?;
        let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        Ok(Self { host, path })
    }

    /// Secure websocket URL for the broker
    pub fn ws_url(&self) -> String {
        format!("wss://{}{}", self.host, self.path)
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ws_url())
    }
}

/// Why a connection went away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// We asked to disconnect
    Requested,

    /// The broker closed the session
    ServerClosed,

    /// Network or protocol failure
    ConnectionLost(String),
}

impl DisconnectReason {
    /// Numeric reason; zero means a clean, requested disconnect
    pub fn code(&self) -> u8 {
        match self {
            DisconnectReason::Requested => 0,
            DisconnectReason::ServerClosed => 1,
            DisconnectReason::ConnectionLost(_) => 7,
        }
    }

    pub fn is_unexpected(&self) -> bool {
        self.code() != 0
    }
}

/// Subscribe capability handed to the listener on connect
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Subscribe to a topic on the current connection
    ///
    /// Implementations may defer the request until the connect callback
    /// returns.
    async fn subscribe(&self, topic: &str) -> Result<()>;
}

/// Receiver of transport events
#[async_trait]
pub trait TransportListener: Send + Sync {
    /// Connection established; subscribe to topics here
    async fn on_connect(&self, subscriber: &dyn Subscriber);

    /// Connection closed or lost
    async fn on_disconnect(&self, reason: &DisconnectReason);

    /// Message received on a subscribed topic
    async fn on_message(&self, topic: &str, payload: &[u8]);

    /// The transport is about to retry the connection
    ///
    /// Returning an endpoint makes the retry target it instead of the
    /// previous one.
    async fn on_reconnecting(&self, detail: &str) -> Option<BrokerEndpoint>;
}

/// A pub/sub connection driver
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Connect to `endpoint` and deliver events to `listener` until shutdown
    async fn run(
        &self,
        endpoint: BrokerEndpoint,
        listener: Arc<dyn TransportListener>,
        shutdown: ShutdownHandle,
    ) -> Result<()>;
}

/// Shared handle to a transport
pub type PubSubTransportHandle = Arc<dyn PubSubTransport>;
