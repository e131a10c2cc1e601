//! Per-target-topic delay scheduling.
//!
//! The scheduler owns the map of in-flight delays, keyed by target topic.
//! Invariant: at most one live task per target topic. A duplicate,
//! non-resetting request for a pending topic is a no-op; a resetting request
//! cancels the pending wait and starts over with the new payload and period.
//!
//! The fire-vs-cancel race is resolved with a generation tag per task: both
//! the timer-fire path and the replace path go through the map entry for the
//! key, and only the party whose generation still matches gets to act. The
//! decision itself runs under the map's per-key lock, so a second request
//! arriving in the same instant always observes the pending task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;

use crate::types::{DashMap, DelayRequest, TopicName};
use crate::Result;

///Outbound seam of the scheduler, implemented by the broker session.
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    async fn publish(&self, topic: &TopicName, payload: Bytes) -> Result<()>;
}

struct DelayTask {
    generation: u64,
    timer: tokio::task::AbortHandle,
}

pub struct DelayScheduler {
    publisher: Arc<dyn Publisher>,
    tasks: Arc<DashMap<TopicName, DelayTask>>,
    generations: AtomicU64,
}

impl DelayScheduler {
    #[inline]
    pub fn new(publisher: Arc<dyn Publisher>) -> Arc<DelayScheduler> {
        Arc::new(Self { publisher, tasks: Arc::new(DashMap::default()), generations: AtomicU64::new(0) })
    }

    ///Apply one control request. Returns immediately; the republish happens
    ///on the shared worker pool once the period elapses.
    pub fn schedule(&self, req: DelayRequest) {
        log::info!(
            "delay message, target topic: {:?}, period: {}s, reset: {}",
            req.target_topic,
            req.period,
            req.reset
        );
        let DelayRequest { target_topic, period, reset, payload } = req;
        match self.tasks.entry(target_topic.clone()) {
            Entry::Occupied(mut o) => {
                if !reset {
                    log::warn!("ignoring delayed message for {:?}, already delayed", target_topic);
                    return;
                }
                //cancel-and-restart: the replaced generation can no longer
                //claim the entry, even if its timer already fired
                let old = o.insert(self.start_timer(target_topic, period, payload));
                old.timer.abort();
            }
            Entry::Vacant(v) => {
                v.insert(self.start_timer(target_topic, period, payload));
            }
        }
    }

    ///Number of target topics with a pending republish.
    #[inline]
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    //Called with the entry's shard lock held, so the task is visible in the
    //map before the first claim attempt can complete.
    fn start_timer(&self, topic: TopicName, period: u64, payload: Bytes) -> DelayTask {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let tasks = self.tasks.clone();
        let publisher = self.publisher.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(period)).await;
            //exactly one of {publish, silent drop}: the claim succeeds only
            //if this generation still owns the entry
            if tasks.remove_if(&topic, |_, t| t.generation == generation).is_none() {
                log::debug!("delay for {:?} superseded, dropping", topic);
                return;
            }
            if let Err(e) = publisher.publish(&topic, payload).await {
                log::warn!("delayed publish to {:?} failed, {:?}", topic, e);
            }
        })
        .abort_handle();
        DelayTask { generation, timer }
    }
}
