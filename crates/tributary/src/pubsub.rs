//! Topic-based pub/sub used to republish state transitions.
//!
//! Delivery is fan-out and at-most-once per subscriber: there is no replay,
//! and a subscriber whose buffer is full misses the message. State stores
//! remain the source of truth.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::Result;
use crate::model::{EventId, ProjectId};

/// Default per-subscriber buffer for [`InMemoryPubSub`].
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Topic carrying every update of one event.
pub fn event_topic(event_id: &EventId) -> String {
    format!("event-tracking-{event_id}")
}

/// Topic carrying project-event updates for one project.
pub fn project_topic(project_id: &ProjectId) -> String {
    format!("project-tracking-{project_id}")
}

#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>>;
}

/// A live subscription to one topic.
#[async_trait]
pub trait Subscription: Send {
    /// Next payload, or `None` once unsubscribed or the transport is gone.
    async fn consume(&mut self) -> Option<Bytes>;

    /// Stop receiving. Subsequent `consume` calls drain what is already
    /// buffered and then return `None`.
    fn unsubscribe(&mut self);
}

/// Process-local pub/sub.
#[derive(Debug, Clone)]
pub struct InMemoryPubSub {
    topics: Arc<DashMap<String, Vec<mpsc::Sender<Bytes>>>>,
    buffer: usize,
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|senders| senders.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for InMemoryPubSub {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        let Some(mut senders) = self.topics.get_mut(topic) else {
            return Ok(());
        };

        senders.retain(|sender| match sender.try_send(payload.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(topic, "subscriber buffer full, dropping message");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        if senders.is_empty() {
            drop(senders);
            self.topics.remove_if(topic, |_, senders| senders.is_empty());
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.topics.entry(topic.to_string()).or_default().push(tx);
        Ok(Box::new(InMemorySubscription { rx }))
    }
}

struct InMemorySubscription {
    rx: mpsc::Receiver<Bytes>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn consume(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    fn unsubscribe(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fans_out_to_every_subscriber() {
        let pubsub = InMemoryPubSub::new();
        let mut a = pubsub.subscribe("t").await.unwrap();
        let mut b = pubsub.subscribe("t").await.unwrap();

        pubsub.publish("t", Bytes::from_static(b"hello")).await.unwrap();

        assert_eq!(a.consume().await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(b.consume().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let pubsub = InMemoryPubSub::new();
        pubsub.publish("nobody", Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(pubsub.subscriber_count("nobody"), 0);
    }

    #[tokio::test]
    async fn unsubscribed_receivers_are_pruned() {
        let pubsub = InMemoryPubSub::new();
        let mut sub = pubsub.subscribe("t").await.unwrap();
        assert_eq!(pubsub.subscriber_count("t"), 1);

        sub.unsubscribe();
        pubsub.publish("t", Bytes::from_static(b"x")).await.unwrap();

        assert_eq!(pubsub.subscriber_count("t"), 0);
        assert!(sub.consume().await.is_none());
    }

    #[tokio::test]
    async fn full_subscriber_misses_messages() {
        let pubsub = InMemoryPubSub::with_buffer(1);
        let mut sub = pubsub.subscribe("t").await.unwrap();

        pubsub.publish("t", Bytes::from_static(b"1")).await.unwrap();
        pubsub.publish("t", Bytes::from_static(b"2")).await.unwrap();

        assert_eq!(sub.consume().await.unwrap(), Bytes::from_static(b"1"));
        sub.unsubscribe();
        assert!(sub.consume().await.is_none());
    }

    #[test]
    fn topic_names() {
        assert_eq!(event_topic(&EventId::from("e1")), "event-tracking-e1");
        assert_eq!(project_topic(&ProjectId::from("p1")), "project-tracking-p1");
    }
}
