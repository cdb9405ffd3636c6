//! MQTT over secure websockets
//!
//! Drives a rumqttc event loop. Connection events are reported to the
//! listener from the poll loop; publishes are handed to a single dispatcher
//! task so a slow renewal never stalls keep-alives, while arrival order is
//! preserved.

use std::sync::Arc;
use std::time::Duration;

use agent_core::config::BrokerConfig;
use agent_core::{Error, Result, ShutdownHandle};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, SubscribeFilter, Transport};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::transport::{
    BrokerEndpoint, DisconnectReason, PubSubTransport, Subscriber, TransportListener,
};

/// Time allowed for the DISCONNECT packet to go out on shutdown
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// rumqttc-backed transport
pub struct MqttTransport {
    config: BrokerConfig,
    client_id: String,
}

impl MqttTransport {
    /// Create a transport with a unique client id for this device session
    pub fn new(config: BrokerConfig, device_id: &str) -> Self {
        let client_id = format!(
            "{}-{}-{}",
            config.client_id_prefix,
            device_id,
            Uuid::new_v4().simple()
        );
        Self { config, client_id }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn options(&self, endpoint: &BrokerEndpoint) -> MqttOptions {
        let mut options =
            MqttOptions::new(self.client_id.clone(), endpoint.ws_url(), self.config.port);
        options.set_transport(Transport::wss_with_default_config());
        options.set_keep_alive(self.config.keep_alive);
        options
    }
}

/// Subscriber bound to the live client
///
/// Topics named during the connect callback are batched and sent as one
/// SUBSCRIBE once the callback returns, since the request channel is bounded
/// and the event loop is not polled while the listener runs.
struct MqttSubscriber {
    client: AsyncClient,
    pending: Mutex<Vec<SubscribeFilter>>,
}

impl MqttSubscriber {
    fn new(client: AsyncClient) -> Self {
        Self {
            client,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Queue every batched topic as a single request; returns the topic count
    fn flush(&self) -> Result<usize> {
        let filters = std::mem::take(&mut *self.pending.lock());
        if filters.is_empty() {
            return Ok(0);
        }
        let count = filters.len();
        self.client
            .try_subscribe_many(filters)
            .map_err(|e| Error::Subscribe {
                topic: format!("{} topics", count),
                message: e.to_string(),
            })?;
        Ok(count)
    }
}

#[async_trait]
impl Subscriber for MqttSubscriber {
    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.pending
            .lock()
            .push(SubscribeFilter::new(topic.to_string(), QoS::AtLeastOnce));
        Ok(())
    }
}

#[async_trait]
impl PubSubTransport for MqttTransport {
    async fn run(
        &self,
        endpoint: BrokerEndpoint,
        listener: Arc<dyn TransportListener>,
        shutdown: ShutdownHandle,
    ) -> Result<()> {
        let (client, mut eventloop) =
            AsyncClient::new(self.options(&endpoint), self.config.channel_capacity);
        let subscriber = MqttSubscriber::new(client.clone());

        let (message_tx, mut message_rx) =
            mpsc::channel::<(String, Bytes)>(self.config.channel_capacity);
        let dispatcher = {
            let listener = Arc::clone(&listener);
            tokio::spawn(async move {
                while let Some((topic, payload)) = message_rx.recv().await {
                    listener.on_message(&topic, &payload).await;
                }
            })
        };

        info!(
            endpoint = %endpoint,
            client_id = %self.client_id,
            "Trying to connect to realtime endpoint"
        );

        let mut shutdown_rx = shutdown.subscribe();
        let mut connected = false;
        let mut failure = None;

        while shutdown.is_running() {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        connected = true;
                        listener.on_connect(&subscriber).await;
                        match subscriber.flush() {
                            Ok(topics) => debug!(topics, "Subscribe request queued"),
                            Err(e) => warn!(error = %e, "Subscribe failed"),
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if message_tx.send((publish.topic, publish.payload)).await.is_err() {
                            failure = Some(Error::Transport {
                                message: "message dispatcher stopped".to_string(),
                            });
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        debug!(pkid = ack.pkid, "Subscription success");
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        connected = false;
                        listener.on_disconnect(&DisconnectReason::ServerClosed).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let detail = e.to_string();
                        if connected {
                            connected = false;
                            listener
                                .on_disconnect(&DisconnectReason::ConnectionLost(detail.clone()))
                                .await;
                        }
                        if let Some(fresh) = listener.on_reconnecting(&detail).await {
                            eventloop.mqtt_options = self.options(&fresh);
                        }
                        if !shutdown.sleep(&mut shutdown_rx, self.config.reconnect_delay).await {
                            break;
                        }
                    }
                },
                _ = shutdown_rx.recv() => break,
            }
        }

        if let Err(e) = client.try_disconnect() {
            debug!(error = %e, "Disconnect request not queued");
        }
        let _ = tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, eventloop.poll()).await;
        if connected {
            listener.on_disconnect(&DisconnectReason::Requested).await;
        }

        drop(message_tx);
        if let Err(e) = dispatcher.await {
            warn!(error = %e, "Message dispatcher ended abnormally");
        }

        match failure {
            Some(e) => Err(e),
            None => {
                info!("Realtime transport closed");
                Ok(())
            }
        }
    }
}
