use std::time::Duration;

use async_trait::async_trait;
use log::info;
use sqlx::{FromRow, PgConnection, PgPool};

use super::{Delivery, MessageBroker, Subscription, TopicSpec, partition_for};
use crate::error::BrokerError;

/// Topic log kept in Postgres. Offsets are dense per partition: appends to one
/// partition are serialized by a transaction-scoped advisory lock, so offset `n`
/// is only visible once every offset below it has committed.
#[derive(Clone)]
pub struct PgBroker {
    pool: PgPool,
    idle_poll: Duration,
}

#[derive(FromRow)]
struct MessageRow {
    message_offset: i64,
    message_key: String,
    payload: Vec<u8>,
}

impl PgBroker {
    pub fn new(pool: PgPool, idle_poll: Duration) -> Self {
        Self { pool, idle_poll }
    }

    async fn partitions(&self, topic: &str) -> Result<u32, BrokerError> {
        let partitions: Option<i32> = sqlx::query_scalar("SELECT partitions FROM topics WHERE name = $1")
            .bind(topic)
            .fetch_optional(&self.pool)
            .await?;
        partitions
            .map(|p| p as u32)
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))
    }
}

#[async_trait]
impl MessageBroker for PgBroker {
    async fn create_topic(&self, spec: &TopicSpec) -> Result<(), BrokerError> {
        spec.validate()?;
        let created = sqlx::query(
            "INSERT INTO topics (name, partitions, replication_factor) VALUES ($1, $2, $3) \
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(&spec.name)
        .bind(spec.partitions as i32)
        .bind(spec.replication_factor as i16)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if created > 0 {
            info!(
                "Created topic {} with {} partitions, replication factor {}",
                spec.name, spec.partitions, spec.replication_factor
            );
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(u32, i64), BrokerError> {
        let partition = partition_for(key, self.partitions(topic).await?);
        let mut tx = self.pool.begin().await?;
        let offset = append(&mut tx, topic, partition, key, payload).await?;
        tx.commit().await?;
        Ok((partition, offset))
    }

    async fn subscribe(&self, topic: &str, group_id: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let partitions = self.partitions(topic).await?;
        let mut positions = vec![0_i64; partitions as usize];

        let committed: Vec<(i32, i64)> = sqlx::query_as(
            "SELECT partition_id, next_offset FROM consumer_offsets WHERE group_id = $1 AND topic = $2",
        )
        .bind(group_id)
        .bind(topic)
        .fetch_all(&self.pool)
        .await?;
        for (partition, next_offset) in committed {
            if let Some(slot) = positions.get_mut(partition as usize) {
                *slot = next_offset;
            }
        }

        Ok(Box::new(PgSubscription {
            pool: self.pool.clone(),
            topic: topic.to_string(),
            group_id: group_id.to_string(),
            positions,
            next_partition: 0,
            idle_poll: self.idle_poll,
        }))
    }
}

/// Appends at the end of the partition. The lock is held until the caller's
/// transaction ends.
async fn append(
    conn: &mut PgConnection,
    topic: &str,
    partition: u32,
    key: &str,
    payload: &[u8],
) -> Result<i64, BrokerError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1), $2)")
        .bind(topic)
        .bind(partition as i32)
        .execute(&mut *conn)
        .await?;
    let offset: i64 = sqlx::query_scalar(
        "INSERT INTO topic_messages (topic, partition_id, message_offset, message_key, payload) \
         SELECT $1, $2, COALESCE(MAX(message_offset), -1) + 1, $3, $4 \
         FROM topic_messages WHERE topic = $1 AND partition_id = $2 \
         RETURNING message_offset",
    )
    .bind(topic)
    .bind(partition as i32)
    .bind(key)
    .bind(payload)
    .fetch_one(&mut *conn)
    .await?;
    Ok(offset)
}

struct PgSubscription {
    pool: PgPool,
    topic: String,
    group_id: String,
    positions: Vec<i64>,
    next_partition: usize,
    idle_poll: Duration,
}

impl PgSubscription {
    async fn next_available(&mut self) -> Result<Option<Delivery>, BrokerError> {
        let count = self.positions.len();
        for step in 0..count {
            let partition = (self.next_partition + step) % count;
            let row: Option<MessageRow> = sqlx::query_as(
                "SELECT message_offset, message_key, payload FROM topic_messages \
                 WHERE topic = $1 AND partition_id = $2 AND message_offset = $3",
            )
            .bind(&self.topic)
            .bind(partition as i32)
            .bind(self.positions[partition])
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = row {
                self.positions[partition] = row.message_offset + 1;
                self.next_partition = (partition + 1) % count;
                return Ok(Some(Delivery {
                    key: row.message_key,
                    payload: row.payload,
                    topic: self.topic.clone(),
                    partition: partition as u32,
                    offset: row.message_offset,
                }));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Subscription for PgSubscription {
    async fn poll(&mut self) -> Result<Option<Delivery>, BrokerError> {
        loop {
            if let Some(delivery) = self.next_available().await? {
                return Ok(Some(delivery));
            }
            tokio::time::sleep(self.idle_poll).await;
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        sqlx::query(
            "INSERT INTO consumer_offsets (group_id, topic, partition_id, next_offset) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (group_id, topic, partition_id) \
             DO UPDATE SET next_offset = GREATEST(consumer_offsets.next_offset, EXCLUDED.next_offset)",
        )
        .bind(&self.group_id)
        .bind(&self.topic)
        .bind(delivery.partition as i32)
        .bind(delivery.offset + 1)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
