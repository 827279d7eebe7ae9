use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broker::{Delivery, MessageBroker, Subscription};
use crate::exchange_rate::RateRecord;
use crate::shutdown::signalled;

/// Currencies reported on when they appear in a consumed record.
pub const MAIN_CURRENCIES: [&str; 7] = ["EUR", "GBP", "JPY", "CHF", "CAD", "AUD", "CNY"];

const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Reads republished records and observes them. Never writes to the store.
pub struct RateConsumer {
    broker: Arc<dyn MessageBroker>,
    topic: String,
    group_id: String,
}

impl RateConsumer {
    pub fn new(broker: Arc<dyn MessageBroker>, topic: &str, group_id: &str) -> Self {
        Self {
            broker,
            topic: topic.to_string(),
            group_id: group_id.to_string(),
        }
    }

    pub fn start(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut subscription = match self.broker.subscribe(&self.topic, &self.group_id).await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!("Could not subscribe to topic {} as {}: {}", self.topic, self.group_id, e);
                return;
            }
        };
        info!("Consuming topic {} as group {}", self.topic, self.group_id);

        loop {
            let polled = tokio::select! {
                polled = subscription.poll() => polled,
                _ = signalled(&mut shutdown) => break,
            };
            match polled {
                Ok(Some(delivery)) => {
                    self.handle(subscription.as_mut(), &delivery).await;
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Error polling topic {}: {}", self.topic, e);
                    tokio::select! {
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                        _ = signalled(&mut shutdown) => break,
                    }
                }
            }
        }
        info!("Stopped consuming topic {}", self.topic);
    }

    /// Acknowledges only when the delivery was processed; returns whether it was.
    pub async fn handle(&self, subscription: &mut dyn Subscription, delivery: &Delivery) -> bool {
        info!(
            "Received exchange rate data - Topic: {}, Partition: {}, Offset: {}, Key: {}",
            delivery.topic, delivery.partition, delivery.offset, delivery.key
        );

        let record: RateRecord = match serde_json::from_slice(&delivery.payload) {
            Ok(record) => record,
            Err(e) => {
                error!(
                    "Error processing exchange rate data at {}/{}/{}: {}",
                    delivery.topic, delivery.partition, delivery.offset, e
                );
                return false;
            }
        };
        debug!(
            "Exchange rate data: Base currency: {}, Rates count: {}, Timestamp: {}",
            record.base_currency,
            record.rates.len(),
            record.timestamp
        );

        observe(&record);

        if let Err(e) = subscription.ack(delivery).await {
            error!(
                "Error acknowledging {}/{}/{}: {}",
                delivery.topic, delivery.partition, delivery.offset, e
            );
            return false;
        }
        true
    }
}

/// Rates of the main currencies present in `record`.
pub fn observe(record: &RateRecord) -> Vec<(&str, Decimal)> {
    info!("Processing exchange rate data for currency: {}", record.base_currency);
    if record.rates.is_empty() {
        warn!("Received exchange rate data with no rates");
        return Vec::new();
    }

    record
        .rates
        .iter()
        .filter(|(code, _)| is_main_currency(code))
        .map(|(code, rate)| {
            debug!("Rate for {}: {}", code, rate);
            (code.as_str(), *rate)
        })
        .collect()
}

pub fn is_main_currency(currency: &str) -> bool {
    MAIN_CURRENCIES.contains(&currency)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::broker::{InMemoryBroker, TopicSpec};
    use crate::error::BrokerError;

    fn record() -> RateRecord {
        RateRecord::new(
            "USD",
            Utc::now(),
            BTreeMap::from([
                ("EUR".to_string(), dec!(0.92)),
                ("MXN".to_string(), dec!(17.1)),
                ("CNY".to_string(), dec!(7.24)),
            ]),
            "test",
        )
    }

    async fn single_partition_broker() -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        broker.create_topic(&TopicSpec::new("rates", 1, 1)).await.unwrap();
        broker
    }

    #[test]
    fn observes_only_main_currencies() {
        let record = record();
        let observed = observe(&record);
        assert_eq!(observed, vec![("CNY", dec!(7.24)), ("EUR", dec!(0.92))]);
    }

    #[test]
    fn empty_record_yields_no_observations() {
        let mut empty = record();
        empty.rates.clear();
        assert!(observe(&empty).is_empty());
    }

    #[test]
    fn main_currency_match_is_exact() {
        assert!(is_main_currency("GBP"));
        assert!(!is_main_currency("USD"));
        assert!(!is_main_currency("gbp"));
        assert!(!is_main_currency("EURO"));
    }

    #[tokio::test]
    async fn acknowledges_processed_records_only() {
        let broker = single_partition_broker().await;
        let payload = serde_json::to_vec(&record()).unwrap();
        broker.publish("rates", "USD", &payload).await.unwrap();
        broker.publish("rates", "USD", b"not json").await.unwrap();

        let consumer = RateConsumer::new(Arc::new(broker.clone()), "rates", "observers");
        let mut subscription = broker.subscribe("rates", "observers").await.unwrap();

        let good = subscription.poll().await.unwrap().unwrap();
        assert!(consumer.handle(subscription.as_mut(), &good).await);
        let bad = subscription.poll().await.unwrap().unwrap();
        assert!(!consumer.handle(subscription.as_mut(), &bad).await);

        assert_eq!(broker.committed("rates", "observers", 0).await, 1);
        let mut again = broker.subscribe("rates", "observers").await.unwrap();
        assert_eq!(again.poll().await.unwrap().unwrap().payload, b"not json");
    }

    #[tokio::test]
    async fn run_drains_topic_until_closed() {
        let broker = single_partition_broker().await;
        for _ in 0..3 {
            let payload = serde_json::to_vec(&record()).unwrap();
            broker.publish("rates", "USD", &payload).await.unwrap();
        }
        broker.close();

        let (_tx, rx) = watch::channel(false);
        RateConsumer::new(Arc::new(broker.clone()), "rates", "observers")
            .run(rx)
            .await;

        assert_eq!(broker.committed("rates", "observers", 0).await, 3);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let broker = single_partition_broker().await;
        let (tx, rx) = watch::channel(false);
        let handle = RateConsumer::new(Arc::new(broker), "rates", "observers").start(rx);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    struct BrokenBroker;

    struct BrokenSubscription;

    #[async_trait::async_trait]
    impl MessageBroker for BrokenBroker {
        async fn create_topic(&self, _spec: &TopicSpec) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn publish(&self, topic: &str, _key: &str, _payload: &[u8]) -> Result<(u32, i64), BrokerError> {
            Err(BrokerError::UnknownTopic(topic.to_string()))
        }

        async fn subscribe(&self, _topic: &str, _group_id: &str) -> Result<Box<dyn Subscription>, BrokerError> {
            Ok(Box::new(BrokenSubscription))
        }
    }

    #[async_trait::async_trait]
    impl Subscription for BrokenSubscription {
        async fn poll(&mut self) -> Result<Option<Delivery>, BrokerError> {
            Err(BrokerError::UnknownTopic("rates".to_string()))
        }

        async fn ack(&mut self, _delivery: &Delivery) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cuts_poll_error_backoff_short() {
        let (tx, rx) = watch::channel(false);
        let handle = RateConsumer::new(Arc::new(BrokenBroker), "rates", "observers").start(rx);
        tokio::time::sleep(Duration::from_millis(10)).await;

        tx.send(true).unwrap();
        tokio::time::timeout(POLL_ERROR_BACKOFF / 2, handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_topic_ends_consumer() {
        let (_tx, rx) = watch::channel(false);
        RateConsumer::new(Arc::new(InMemoryBroker::new()), "missing", "observers")
            .run(rx)
            .await;
    }
}
