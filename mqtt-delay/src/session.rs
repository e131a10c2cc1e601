//! Broker session management.
//!
//! One logical connection to the broker, its lifecycle state and the durable
//! subscription registry. The registry is append-only and survives link loss:
//! every time the transport reports a (re)established connection, the entire
//! set is replayed against the fresh link, preserving each entry's original
//! topic filter and QoS. The physical socket may come and go underneath; the
//! session object stays.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::delay::Publisher;
use crate::topic::filter_matches;
use crate::transport::{Transport, TransportEvent};
use crate::types::{MessageHandler, QoS, TopicFilter, TopicName};
use crate::Result;

///Driven by transport events only, never by application logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

struct SubscriptionEntry {
    topic_filter: TopicFilter,
    qos: QoS,
    handler: MessageHandler,
}

pub struct MqttSession {
    transport: Arc<dyn Transport>,
    state: RwLock<SessionState>,
    subscriptions: RwLock<Vec<SubscriptionEntry>>,
}

impl MqttSession {
    #[inline]
    pub fn new(transport: Arc<dyn Transport>) -> Arc<MqttSession> {
        Arc::new(Self {
            transport,
            state: RwLock::new(SessionState::Connecting),
            subscriptions: RwLock::new(Vec::new()),
        })
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    ///Best-effort publish. Failures are logged and surfaced, never retried
    ///at this layer; the transport's reconnect takes care of future traffic.
    pub async fn publish(&self, topic: &TopicName, payload: Bytes) -> Result<()> {
        log::info!("publishing, topic: {:?}, {} bytes", topic, payload.len());
        if let Err(e) = self.transport.publish(topic, payload).await {
            log::warn!("publish to {:?} failed, {:?}", topic, e);
            return Err(e);
        }
        Ok(())
    }

    ///Record a subscription and, if the link is up, apply it immediately.
    ///Entries already present by `(topic_filter, handler)` identity are left
    ///as-is. Recorded entries are applied on every future (re)connect.
    pub async fn subscribe(&self, topic_filter: TopicFilter, qos: QoS, handler: MessageHandler) -> Result<()> {
        log::info!("subscribing, topic filter: {:?}, qos: {:?}", topic_filter, qos);
        let registered = {
            let mut subs = self.subscriptions.write();
            if subs.iter().any(|s| s.topic_filter == topic_filter && Arc::ptr_eq(&s.handler, &handler)) {
                false
            } else {
                subs.push(SubscriptionEntry { topic_filter: topic_filter.clone(), qos, handler });
                true
            }
        };
        if registered && self.state() == SessionState::Connected {
            self.transport.subscribe(&topic_filter, qos).await?;
        }
        Ok(())
    }

    ///Consume transport events until the channel closes. Runs for the life
    ///of the process; `Disconnected` is only entered on shutdown.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(ev) = events.recv().await {
            match ev {
                TransportEvent::Connected => {
                    let prev = {
                        let mut state = self.state.write();
                        std::mem::replace(&mut *state, SessionState::Connected)
                    };
                    log::info!("broker connected, previous state: {:?}", prev);
                    self.replay_subscriptions().await;
                }
                TransportEvent::ConnectionLost => {
                    *self.state.write() = SessionState::Reconnecting;
                    log::warn!("broker connection lost, awaiting automatic reconnect");
                }
                TransportEvent::Message { topic, payload } => {
                    self.dispatch(topic, payload);
                }
            }
        }
        *self.state.write() = SessionState::Disconnected;
        log::info!("session closed");
    }

    //Replays the full registry, not just new entries, once per (re)connect.
    async fn replay_subscriptions(&self) {
        let entries = self
            .subscriptions
            .read()
            .iter()
            .map(|s| (s.topic_filter.clone(), s.qos))
            .collect::<Vec<_>>();
        for (topic_filter, qos) in entries {
            if let Err(e) = self.transport.subscribe(&topic_filter, qos).await {
                log::warn!("re-subscribe {:?} failed, {:?}", topic_filter, e);
            }
        }
    }

    fn dispatch(&self, topic: TopicName, payload: Bytes) {
        let subs = self.subscriptions.read();
        for entry in subs.iter().filter(|s| filter_matches(&s.topic_filter, &topic)) {
            (entry.handler)(topic.clone(), payload.clone());
        }
    }
}

#[async_trait]
impl Publisher for MqttSession {
    #[inline]
    async fn publish(&self, topic: &TopicName, payload: Bytes) -> Result<()> {
        MqttSession::publish(self, topic, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::time::sleep;

    #[derive(Default)]
    struct MockTransport {
        subscribes: Mutex<Vec<(TopicFilter, QoS)>>,
        publishes: Mutex<Vec<(TopicName, Bytes)>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn publish(&self, topic: &TopicName, payload: Bytes) -> Result<()> {
            self.publishes.lock().push((topic.clone(), payload));
            Ok(())
        }

        async fn subscribe(&self, topic_filter: &TopicFilter, qos: QoS) -> Result<()> {
            self.subscribes.lock().push((topic_filter.clone(), qos));
            Ok(())
        }
    }

    fn noop_handler() -> MessageHandler {
        Arc::new(|_, _| {})
    }

    async fn settle() {
        sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_subscribe_before_connect_is_recorded_only() {
        let transport = Arc::new(MockTransport::default());
        let session = MqttSession::new(transport.clone());
        assert_eq!(session.state(), SessionState::Connecting);

        session.subscribe(TopicFilter::from("delayed/#"), QoS::ExactlyOnce, noop_handler()).await.unwrap();
        //not connected yet: recorded, not issued
        assert!(transport.subscribes.lock().is_empty());

        let (tx, rx) = mpsc::channel(8);
        let run = tokio::spawn(session.clone().run(rx));
        tx.send(TransportEvent::Connected).await.unwrap();
        settle().await;

        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(transport.subscribes.lock().as_slice(), &[(TopicFilter::from("delayed/#"), QoS::ExactlyOnce)]);

        drop(tx);
        run.await.unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_subscribe_while_connected_is_issued_immediately() {
        let transport = Arc::new(MockTransport::default());
        let session = MqttSession::new(transport.clone());

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(session.clone().run(rx));
        tx.send(TransportEvent::Connected).await.unwrap();
        settle().await;

        session.subscribe(TopicFilter::from("a/b"), QoS::AtMostOnce, noop_handler()).await.unwrap();
        assert_eq!(transport.subscribes.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_replays_every_entry_once() {
        let transport = Arc::new(MockTransport::default());
        let session = MqttSession::new(transport.clone());

        //two entries sharing a filter (distinct handlers) plus a third
        session.subscribe(TopicFilter::from("delayed/#"), QoS::ExactlyOnce, noop_handler()).await.unwrap();
        session.subscribe(TopicFilter::from("delayed/#"), QoS::ExactlyOnce, noop_handler()).await.unwrap();
        session.subscribe(TopicFilter::from("+/delayed/#"), QoS::ExactlyOnce, noop_handler()).await.unwrap();

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(session.clone().run(rx));

        tx.send(TransportEvent::Connected).await.unwrap();
        settle().await;
        assert_eq!(transport.subscribes.lock().len(), 3);

        tx.send(TransportEvent::ConnectionLost).await.unwrap();
        settle().await;
        assert_eq!(session.state(), SessionState::Reconnecting);
        assert_eq!(transport.subscribes.lock().len(), 3);

        tx.send(TransportEvent::Connected).await.unwrap();
        settle().await;
        assert_eq!(session.state(), SessionState::Connected);
        //full registry replayed exactly once more
        assert_eq!(transport.subscribes.lock().len(), 6);
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_idempotent() {
        let transport = Arc::new(MockTransport::default());
        let session = MqttSession::new(transport.clone());

        let handler = noop_handler();
        session.subscribe(TopicFilter::from("delayed/#"), QoS::ExactlyOnce, handler.clone()).await.unwrap();
        session.subscribe(TopicFilter::from("delayed/#"), QoS::ExactlyOnce, handler).await.unwrap();

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(session.clone().run(rx));
        tx.send(TransportEvent::Connected).await.unwrap();
        settle().await;

        assert_eq!(transport.subscribes.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_messages_route_to_matching_handlers() {
        let transport = Arc::new(MockTransport::default());
        let session = MqttSession::new(transport.clone());

        let seen = Arc::new(Mutex::new(Vec::<(TopicName, Bytes)>::new()));
        let seen2 = seen.clone();
        let handler: MessageHandler = Arc::new(move |topic, payload| seen2.lock().push((topic, payload)));
        session.subscribe(TopicFilter::from("delayed/#"), QoS::ExactlyOnce, handler).await.unwrap();

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(session.clone().run(rx));
        tx.send(TransportEvent::Connected).await.unwrap();

        tx.send(TransportEvent::Message {
            topic: TopicName::from("delayed/5/room/lamp"),
            payload: Bytes::from_static(b"on"),
        })
        .await
        .unwrap();
        tx.send(TransportEvent::Message {
            topic: TopicName::from("unrelated/topic"),
            payload: Bytes::from_static(b"ignored"),
        })
        .await
        .unwrap();
        settle().await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "delayed/5/room/lamp");
        assert_eq!(seen[0].1, Bytes::from_static(b"on"));
    }

    #[tokio::test]
    async fn test_publish_delegates_to_transport() {
        let transport = Arc::new(MockTransport::default());
        let session = MqttSession::new(transport.clone());

        session.publish(&TopicName::from("room/lamp"), Bytes::from_static(b"on")).await.unwrap();
        assert_eq!(
            transport.publishes.lock().as_slice(),
            &[(TopicName::from("room/lamp"), Bytes::from_static(b"on"))]
        );
    }
}
