use std::collections::HashMap;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::info;
use tokio::sync::{Mutex, Notify};

use super::{Delivery, MessageBroker, Subscription, TopicSpec, partition_for};
use crate::error::BrokerError;

struct StoredMessage {
    key: String,
    payload: Vec<u8>,
}

struct TopicLog {
    partitions: Vec<Vec<StoredMessage>>,
}

#[derive(Default)]
struct Shared {
    topics: Mutex<HashMap<String, TopicLog>>,
    committed: Mutex<HashMap<(String, String), Vec<i64>>>,
    notify: Notify,
    closed: AtomicBool,
}

/// Process-local broker. Messages live as long as the broker does.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribers drain what is left, then `poll` returns `None`.
    #[cfg(test)]
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_waiters();
    }

    #[cfg(test)]
    pub async fn committed(&self, topic: &str, group_id: &str, partition: u32) -> i64 {
        self.shared
            .committed
            .lock()
            .await
            .get(&(group_id.to_string(), topic.to_string()))
            .and_then(|offsets| offsets.get(partition as usize).copied())
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub async fn message_count(&self, topic: &str) -> usize {
        self.shared
            .topics
            .lock()
            .await
            .get(topic)
            .map(|log| log.partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn create_topic(&self, spec: &TopicSpec) -> Result<(), BrokerError> {
        spec.validate()?;
        let mut topics = self.shared.topics.lock().await;
        if !topics.contains_key(&spec.name) {
            info!(
                "Created in-memory topic {} with {} partitions (replication factor {} not applicable)",
                spec.name, spec.partitions, spec.replication_factor
            );
            let partitions = (0..spec.partitions).map(|_| Vec::new()).collect();
            topics.insert(spec.name.clone(), TopicLog { partitions });
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(u32, i64), BrokerError> {
        let position = {
            let mut topics = self.shared.topics.lock().await;
            let log = topics
                .get_mut(topic)
                .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;
            let partition = partition_for(key, log.partitions.len() as u32);
            let messages = &mut log.partitions[partition as usize];
            messages.push(StoredMessage {
                key: key.to_string(),
                payload: payload.to_vec(),
            });
            (partition, messages.len() as i64 - 1)
        };
        self.shared.notify.notify_waiters();
        Ok(position)
    }

    async fn subscribe(&self, topic: &str, group_id: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let partitions = self
            .shared
            .topics
            .lock()
            .await
            .get(topic)
            .map(|log| log.partitions.len())
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;

        let positions = self
            .shared
            .committed
            .lock()
            .await
            .get(&(group_id.to_string(), topic.to_string()))
            .cloned()
            .unwrap_or_else(|| vec![0; partitions]);

        Ok(Box::new(MemorySubscription {
            shared: Arc::clone(&self.shared),
            topic: topic.to_string(),
            group_id: group_id.to_string(),
            positions,
            next_partition: 0,
        }))
    }
}

struct MemorySubscription {
    shared: Arc<Shared>,
    topic: String,
    group_id: String,
    positions: Vec<i64>,
    next_partition: usize,
}

impl MemorySubscription {
    async fn next_available(&mut self) -> Option<Delivery> {
        let topics = self.shared.topics.lock().await;
        let log = topics.get(&self.topic)?;
        let count = log.partitions.len();
        for step in 0..count {
            let partition = (self.next_partition + step) % count;
            let offset = self.positions[partition];
            if let Some(message) = log.partitions[partition].get(offset as usize) {
                self.positions[partition] = offset + 1;
                self.next_partition = (partition + 1) % count;
                return Some(Delivery {
                    key: message.key.clone(),
                    payload: message.payload.clone(),
                    topic: self.topic.clone(),
                    partition: partition as u32,
                    offset,
                });
            }
        }
        None
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn poll(&mut self) -> Result<Option<Delivery>, BrokerError> {
        let shared = Arc::clone(&self.shared);
        loop {
            let mut notified = pin!(shared.notify.notified());
            notified.as_mut().enable();
            if let Some(delivery) = self.next_available().await {
                return Ok(Some(delivery));
            }
            if shared.closed.load(Ordering::Acquire) {
                return Ok(None);
            }
            notified.await;
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        let mut committed = self.shared.committed.lock().await;
        let offsets = committed
            .entry((self.group_id.clone(), self.topic.clone()))
            .or_insert_with(|| vec![0; self.positions.len()]);
        if let Some(slot) = offsets.get_mut(delivery.partition as usize) {
            *slot = (*slot).max(delivery.offset + 1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn broker() -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        broker.create_topic(&TopicSpec::new("rates", 3, 1)).await.unwrap();
        broker
    }

    #[tokio::test]
    async fn publish_to_unknown_topic_fails() {
        let broker = InMemoryBroker::new();
        let err = broker.publish("missing", "USD", b"{}").await.unwrap_err();
        assert!(matches!(err, BrokerError::UnknownTopic(_)));
    }

    #[tokio::test]
    async fn same_key_keeps_order_within_partition() {
        let broker = broker().await;
        let (p1, o1) = broker.publish("rates", "USD", b"1").await.unwrap();
        let (p2, o2) = broker.publish("rates", "USD", b"2").await.unwrap();
        assert_eq!(p1, p2);
        assert_eq!(o2, o1 + 1);

        let mut sub = broker.subscribe("rates", "g").await.unwrap();
        let first = sub.poll().await.unwrap().unwrap();
        let second = sub.poll().await.unwrap().unwrap();
        assert_eq!(first.payload, b"1");
        assert_eq!(second.payload, b"2");
        assert_eq!(first.key, "USD");
        assert_eq!(first.topic, "rates");
    }

    #[tokio::test]
    async fn unacked_messages_are_redelivered_to_next_subscription() {
        let broker = broker().await;
        broker.publish("rates", "USD", b"a").await.unwrap();
        broker.publish("rates", "USD", b"b").await.unwrap();

        let mut sub = broker.subscribe("rates", "g").await.unwrap();
        let a = sub.poll().await.unwrap().unwrap();
        sub.ack(&a).await.unwrap();
        let b = sub.poll().await.unwrap().unwrap();
        assert_eq!(b.payload, b"b");
        drop(sub);

        assert_eq!(broker.committed("rates", "g", a.partition).await, a.offset + 1);
        let mut again = broker.subscribe("rates", "g").await.unwrap();
        let redelivered = again.poll().await.unwrap().unwrap();
        assert_eq!(redelivered, b);
    }

    #[tokio::test]
    async fn later_ack_commits_past_unacked_message() {
        let broker = broker().await;
        broker.publish("rates", "USD", b"a").await.unwrap();
        broker.publish("rates", "USD", b"b").await.unwrap();

        let mut sub = broker.subscribe("rates", "g").await.unwrap();
        let _skipped = sub.poll().await.unwrap().unwrap();
        let b = sub.poll().await.unwrap().unwrap();
        sub.ack(&b).await.unwrap();
        drop(sub);

        assert_eq!(broker.committed("rates", "g", b.partition).await, b.offset + 1);
        broker.close();
        let mut again = broker.subscribe("rates", "g").await.unwrap();
        assert_eq!(again.poll().await.unwrap(), None);
    }

    #[tokio::test]
    async fn groups_are_independent() {
        let broker = broker().await;
        broker.publish("rates", "EUR", b"x").await.unwrap();

        let mut first = broker.subscribe("rates", "one").await.unwrap();
        let d = first.poll().await.unwrap().unwrap();
        first.ack(&d).await.unwrap();

        let mut second = broker.subscribe("rates", "two").await.unwrap();
        assert_eq!(second.poll().await.unwrap().unwrap().payload, b"x");
    }

    #[tokio::test]
    async fn poll_waits_for_publish() {
        let broker = broker().await;
        let mut sub = broker.subscribe("rates", "g").await.unwrap();
        let publisher = broker.clone();
        let handle = tokio::spawn(async move { sub.poll().await.unwrap() });
        tokio::task::yield_now().await;
        publisher.publish("rates", "GBP", b"late").await.unwrap();
        let delivery = handle.await.unwrap().unwrap();
        assert_eq!(delivery.payload, b"late");
    }

    #[tokio::test]
    async fn close_ends_polling() {
        let broker = broker().await;
        let mut sub = broker.subscribe("rates", "g").await.unwrap();
        broker.close();
        assert!(sub.poll().await.unwrap().is_none());
    }
}
