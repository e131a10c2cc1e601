//! Opaque broker connection: publish/subscribe primitives plus an event feed
//! carrying connect, link-loss and inbound-message notifications.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet};
use tokio::sync::mpsc;

use crate::settings::Mqtt;
use crate::types::{QoS, TopicFilter, TopicName};
use crate::{DelayError, Result};

pub enum TransportEvent {
    ///Link (re)established; the session replays its subscription registry
    Connected,
    ///Link dropped; the transport keeps reconnecting on its own
    ConnectionLost,
    ///Inbound publish delivered by the broker
    Message { topic: TopicName, payload: Bytes },
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn publish(&self, topic: &TopicName, payload: Bytes) -> Result<()>;
    async fn subscribe(&self, topic_filter: &TopicFilter, qos: QoS) -> Result<()>;
}

///Production transport over `rumqttc`. The event loop owns reconnection;
///this layer adds no backoff of its own beyond the configured pause between
///attempts.
pub struct MqttTransport {
    client: AsyncClient,
}

impl MqttTransport {
    ///Build the client and spawn its event pump. Events arrive on the
    ///returned channel; hand it to `MqttSession::run`.
    pub fn bootstrap(cfg: &Mqtt) -> (Arc<MqttTransport>, mpsc::Receiver<TransportEvent>) {
        let client_id = cfg.client_id.clone().unwrap_or_else(generate_client_id);
        log::info!(
            "connecting, server: {}, client id: {:?}, control root: {:?}",
            cfg.server,
            client_id,
            cfg.base
        );

        let mut options = MqttOptions::new(client_id, cfg.server.host.clone(), cfg.server.port);
        options.set_keep_alive(cfg.keepalive);
        options.set_clean_session(true);
        if let (Some(username), Some(password)) = (cfg.username.as_ref(), cfg.password.as_ref()) {
            options.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(poll_loop(eventloop, tx, cfg.reconnect_interval));
        (Arc::new(Self { client }), rx)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(&self, topic: &TopicName, payload: Bytes) -> Result<()> {
        self.client
            .publish_bytes(topic.to_string(), QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| DelayError::Transport(anyhow!(e)))
    }

    async fn subscribe(&self, topic_filter: &TopicFilter, qos: QoS) -> Result<()> {
        self.client
            .subscribe(topic_filter.to_string(), qos)
            .await
            .map_err(|e| DelayError::Transport(anyhow!(e)))
    }
}

async fn poll_loop(mut eventloop: EventLoop, tx: mpsc::Sender<TransportEvent>, reconnect_interval: Duration) {
    let mut connected = false;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected = true;
                if tx.send(TransportEvent::Connected).await.is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let ev = TransportEvent::Message {
                    topic: TopicName::from(publish.topic),
                    payload: publish.payload,
                };
                if tx.send(ev).await.is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                if connected {
                    connected = false;
                    log::warn!("broker link lost, {:?}", e);
                    if tx.send(TransportEvent::ConnectionLost).await.is_err() {
                        break;
                    }
                } else {
                    log::warn!("broker connect failed, {:?}", e);
                }
                tokio::time::sleep(reconnect_interval).await;
            }
        }
    }
    log::info!("transport event pump stopped");
}

fn generate_client_id() -> String {
    format!("mqtt-delay_{}", uuid::Uuid::new_v4())
}
