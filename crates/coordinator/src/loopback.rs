//! In-process transport
//!
//! Delivers messages injected with [`LoopbackTransport::publish`] to the
//! listener as if they came from a broker. Used for dry runs and for
//! driving the coordinator end to end without a network.

use std::sync::Arc;

use agent_core::{Result, ShutdownHandle};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::transport::{
    BrokerEndpoint, DisconnectReason, PubSubTransport, Subscriber, TransportListener,
};

enum LoopbackEvent {
    Message { topic: String, payload: Vec<u8> },
    Drop { detail: String },
    Flush(oneshot::Sender<()>),
}

/// Broker stand-in living in the same process
pub struct LoopbackTransport {
    events_tx: mpsc::UnboundedSender<LoopbackEvent>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<LoopbackEvent>>,
    subscriptions: Mutex<Vec<String>>,
    endpoints: Mutex<Vec<BrokerEndpoint>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
            subscriptions: Mutex::new(Vec::new()),
            endpoints: Mutex::new(Vec::new()),
        }
    }

    /// Queue a message on a topic
    pub fn publish(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        let _ = self.events_tx.send(LoopbackEvent::Message {
            topic: topic.into(),
            payload: payload.into(),
        });
    }

    /// Simulate a lost connection followed by a reconnect
    pub fn drop_connection(&self, detail: impl Into<String>) {
        let _ = self.events_tx.send(LoopbackEvent::Drop {
            detail: detail.into(),
        });
    }

    /// Wait until every event queued before this call has been handled
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.events_tx.send(LoopbackEvent::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Topics subscribed on the current connection
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    /// Every endpoint a connection was made to, in order
    pub fn endpoints(&self) -> Vec<BrokerEndpoint> {
        self.endpoints.lock().clone()
    }

    async fn connect(&self, endpoint: BrokerEndpoint, listener: &dyn TransportListener) {
        debug!(endpoint = %endpoint, "Loopback connected");
        self.endpoints.lock().push(endpoint);
        listener.on_connect(self).await;
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Subscriber for LoopbackTransport {
    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.subscriptions.lock().push(topic.to_string());
        Ok(())
    }
}

#[async_trait]
impl PubSubTransport for LoopbackTransport {
    async fn run(
        &self,
        endpoint: BrokerEndpoint,
        listener: Arc<dyn TransportListener>,
        shutdown: ShutdownHandle,
    ) -> Result<()> {
        let mut events = self.events_rx.lock().await;
        let mut shutdown_rx = shutdown.subscribe();
        let mut current = endpoint;

        self.connect(current.clone(), listener.as_ref()).await;

        while shutdown.is_running() {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = shutdown_rx.recv() => break,
            };
            let Some(event) = event else { break };

            match event {
                LoopbackEvent::Message { topic, payload } => {
                    let subscribed = self.subscriptions.lock().contains(&topic);
                    if subscribed {
                        listener.on_message(&topic, &payload).await;
                    } else {
                        debug!(topic = %topic, "No subscriber; message discarded");
                    }
                }
                LoopbackEvent::Drop { detail } => {
                    self.subscriptions.lock().clear();
                    listener
                        .on_disconnect(&DisconnectReason::ConnectionLost(detail.clone()))
                        .await;
                    if let Some(fresh) = listener.on_reconnecting(&detail).await {
                        current = fresh;
                    }
                    self.connect(current.clone(), listener.as_ref()).await;
                }
                LoopbackEvent::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }

        self.subscriptions.lock().clear();
        listener.on_disconnect(&DisconnectReason::Requested).await;
        Ok(())
    }
}
