use std::sync::Arc;

use log::{debug, error, warn};

use crate::broker::MessageBroker;
use crate::error::PublishError;
use crate::exchange_rate::RateRecord;

/// Sends records onto the rates topic keyed by base currency.
#[derive(Clone)]
pub struct RatePublisher {
    broker: Arc<dyn MessageBroker>,
    topic: String,
}

impl RatePublisher {
    pub fn new(broker: Arc<dyn MessageBroker>, topic: &str) -> Self {
        Self {
            broker,
            topic: topic.to_string(),
        }
    }

    /// Best effort: returns whether the record reached the broker.
    pub async fn publish(&self, record: &RateRecord) -> bool {
        if !record.is_valid() {
            warn!("Refusing to publish exchange rates for {:?} without rates", record.base_currency);
            return false;
        }

        match self.send(record).await {
            Ok((partition, offset)) => {
                debug!(
                    "Published exchange rate data {} to topic {} (partition {}, offset {})",
                    record.id, self.topic, partition, offset
                );
                true
            }
            Err(e) => {
                error!("Error publishing {} to topic {}: {}", record.id, self.topic, e);
                false
            }
        }
    }

    async fn send(&self, record: &RateRecord) -> Result<(u32, i64), PublishError> {
        let payload = serde_json::to_vec(record)?;
        let position = self
            .broker
            .publish(&self.topic, &record.base_currency, &payload)
            .await?;
        Ok(position)
    }
}
