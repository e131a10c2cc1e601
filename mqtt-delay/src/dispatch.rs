//! Bridges inbound control messages to the parser and the scheduler.
//!
//! Fault isolation boundary: nothing that goes wrong with a single control
//! message is allowed back into the transport callback path. A malformed
//! topic is logged and dropped without touching other pending delays.

use std::sync::Arc;

use bytes::Bytes;

use crate::delay::DelayScheduler;
use crate::session::MqttSession;
use crate::topic;
use crate::types::{MessageHandler, QoS, TopicFilter};
use crate::Result;

pub struct Dispatcher {
    base: String,
    scheduler: Arc<DelayScheduler>,
}

impl Dispatcher {
    #[inline]
    pub fn new(base: impl Into<String>, scheduler: Arc<DelayScheduler>) -> Arc<Dispatcher> {
        Arc::new(Self { base: base.into(), scheduler })
    }

    ///Register the control subscriptions: `<base>/#` and `+/<base>/#`, both
    ///at QoS 2. The single-level wildcard form carries prefixed multi-tenant
    ///control topics.
    pub async fn register(self: &Arc<Self>, session: &Arc<MqttSession>) -> Result<()> {
        log::info!("registering control subscriptions, base: {:?}", self.base);
        for topic_filter in [format!("{}/#", self.base), format!("+/{}/#", self.base)] {
            let dispatcher = self.clone();
            let handler: MessageHandler =
                Arc::new(move |topic, payload| dispatcher.on_message(&topic, payload));
            session.subscribe(TopicFilter::from(topic_filter), QoS::ExactlyOnce, handler).await?;
        }
        Ok(())
    }

    pub fn on_message(&self, control_topic: &str, payload: Bytes) {
        log::debug!("control message, topic: {:?}, {} bytes", control_topic, payload.len());
        match topic::parse(&self.base, control_topic, payload) {
            Ok(req) => self.scheduler.schedule(req),
            Err(e) => log::warn!("dropping control message on {:?}, {}", control_topic, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    use crate::delay::Publisher;
    use crate::transport::{Transport, TransportEvent};
    use crate::types::TopicName;

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

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<(TopicName, Bytes)>>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, topic: &TopicName, payload: Bytes) -> Result<()> {
            self.published.lock().push((topic.clone(), payload));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_register_subscribes_both_control_filters() {
        let transport = Arc::new(MockTransport::default());
        let session = MqttSession::new(transport.clone());
        let publisher = Arc::new(RecordingPublisher::default());
        let dispatcher = Dispatcher::new("delayed", DelayScheduler::new(publisher));

        dispatcher.register(&session).await.unwrap();

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(session.clone().run(rx));
        tx.send(TransportEvent::Connected).await.unwrap();
        sleep(Duration::from_millis(50)).await;

        assert_eq!(
            transport.subscribes.lock().as_slice(),
            &[
                (TopicFilter::from("delayed/#"), QoS::ExactlyOnce),
                (TopicFilter::from("+/delayed/#"), QoS::ExactlyOnce),
            ]
        );
    }

    #[tokio::test]
    async fn test_control_message_is_parsed_and_scheduled() {
        let publisher = Arc::new(RecordingPublisher::default());
        let dispatcher = Dispatcher::new("delayed", DelayScheduler::new(publisher.clone()));

        dispatcher.on_message("delayed/0/expected/topic", Bytes::from_static(b"payload"));
        sleep(Duration::from_millis(100)).await;

        assert_eq!(
            publisher.published.lock().as_slice(),
            &[(TopicName::from("expected/topic"), Bytes::from_static(b"payload"))]
        );
    }

    #[tokio::test]
    async fn test_malformed_control_message_is_dropped() {
        let publisher = Arc::new(RecordingPublisher::default());
        let dispatcher = Dispatcher::new("delayed", DelayScheduler::new(publisher.clone()));

        dispatcher.on_message("delayed/notanumber/x", Bytes::from_static(b"junk"));
        dispatcher.on_message("unrelated/topic", Bytes::from_static(b"junk"));

        //a bad message never destabilizes later ones
        dispatcher.on_message("delayed/0/still/works", Bytes::from_static(b"ok"));
        sleep(Duration::from_millis(100)).await;

        let published = publisher.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "still/works");
    }

    //end to end: control message in, delayed republish out through the session
    #[tokio::test]
    async fn test_relay_round_trip() {
        let transport = Arc::new(MockTransport::default());
        let session = MqttSession::new(transport.clone());
        let scheduler = DelayScheduler::new(session.clone());
        let dispatcher = Dispatcher::new("delayed", scheduler);
        dispatcher.register(&session).await.unwrap();

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(session.clone().run(rx));
        tx.send(TransportEvent::Connected).await.unwrap();
        tx.send(TransportEvent::Message {
            topic: TopicName::from("delayed/0/room/lamp"),
            payload: Bytes::from_static(b"on"),
        })
        .await
        .unwrap();
        sleep(Duration::from_millis(200)).await;

        assert_eq!(
            transport.publishes.lock().as_slice(),
            &[(TopicName::from("room/lamp"), Bytes::from_static(b"on"))]
        );
    }
}
