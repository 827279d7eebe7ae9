//! Topic capability: keyed publish, grouped consumption with explicit acknowledgement.
//!
//! Commits work per partition, as in Kafka: acknowledging offset `n` commits
//! `n + 1` for that partition, and the committed position never moves back.
//! A delivery that was not acknowledged is handed out again to the next
//! subscription of the group unless a later offset of the same partition was
//! acknowledged first.

use async_trait::async_trait;

use crate::error::BrokerError;

mod memory;
mod postgres;

pub use memory::InMemoryBroker;
pub use postgres::PgBroker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u16,
}

impl TopicSpec {
    pub fn new(name: &str, partitions: u32, replication_factor: u16) -> Self {
        Self {
            name: name.to_string(),
            partitions,
            replication_factor,
        }
    }

    fn validate(&self) -> Result<(), BrokerError> {
        if self.name.trim().is_empty() {
            return Err(BrokerError::InvalidTopic("empty topic name".to_string()));
        }
        if self.partitions == 0 {
            return Err(BrokerError::InvalidTopic(format!("{} has zero partitions", self.name)));
        }
        if self.replication_factor == 0 {
            return Err(BrokerError::InvalidTopic(format!(
                "{} has zero replication factor",
                self.name
            )));
        }
        Ok(())
    }
}

/// A message handed to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub key: String,
    pub payload: Vec<u8>,
    pub topic: String,
    pub partition: u32,
    pub offset: i64,
}

#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Creates the topic, or leaves an existing one untouched.
    async fn create_topic(&self, spec: &TopicSpec) -> Result<(), BrokerError>;

    /// Appends to the partition chosen by `key`. Returns `(partition, offset)`.
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(u32, i64), BrokerError>;

    async fn subscribe(&self, topic: &str, group_id: &str) -> Result<Box<dyn Subscription>, BrokerError>;
}

#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next message. `None` once the broker is closed.
    async fn poll(&mut self) -> Result<Option<Delivery>, BrokerError>;

    /// Commits the group's position past `delivery`.
    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError>;
}

/// FNV-1a; stable across processes so a key always maps to the same partition.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash % partitions.max(1)
}
