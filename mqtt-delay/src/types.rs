use std::sync::Arc;

use bytes::Bytes;

pub type TopicName = bytestring::ByteString;
pub type TopicFilter = bytestring::ByteString;
pub type Period = u64;

pub type QoS = rumqttc::QoS;

pub type DashMap<K, V> = dashmap::DashMap<K, V, ahash::RandomState>;

///Callback invoked for every inbound publish matching a registered topic filter.
pub type MessageHandler = Arc<dyn Fn(TopicName, Bytes) + Send + Sync>;

///A parsed control message: republish `payload` to `target_topic` once
///`period` seconds have elapsed. Produced by `topic::parse`, consumed
///exactly once by the delay scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayRequest {
    pub target_topic: TopicName,
    pub period: Period,
    pub reset: bool,
    pub payload: Bytes,
}
