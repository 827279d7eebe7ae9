use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};

use crate::error::IngestError;
use crate::exchange_rate::RateRecord;
use crate::normalizer;
use crate::provider::ProviderClient;
use crate::publisher::RatePublisher;
use crate::store::RateStore;

/// Fetch, normalize, publish and store the rates of one base currency.
pub struct IngestionService {
    provider: Arc<dyn ProviderClient>,
    publisher: RatePublisher,
    store: RateStore,
    default_provider: String,
}

impl IngestionService {
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        publisher: RatePublisher,
        store: RateStore,
        default_provider: &str,
    ) -> Self {
        Self {
            provider,
            publisher,
            store,
            default_provider: default_provider.to_string(),
        }
    }

    /// Returns the fetched record even when publishing or storing it failed;
    /// those outcomes only show up in the logs.
    pub async fn ingest(&self, base_currency: &str) -> Result<RateRecord, IngestError> {
        let base_currency = base_currency.trim().to_uppercase();
        info!(
            "Fetching exchange rates for base currency {} from {}",
            base_currency,
            self.provider.name()
        );

        let response = match self.provider.fetch(&base_currency).await {
            Ok(response) => response,
            Err(e) => {
                error!("Error fetching exchange rates for currency {}: {}", base_currency, e);
                return Err(e.into());
            }
        };

        let Some(record) = normalizer::normalize(response, &base_currency, Utc::now(), &self.default_provider)
        else {
            warn!("No exchange rate data received for currency: {}", base_currency);
            return Err(IngestError::Empty(base_currency));
        };

        let published = self.publisher.publish(&record).await;
        let stored = self.store.save(&record).await;
        if published && stored {
            info!("Successfully processed exchange rates for {}", base_currency);
        } else {
            warn!(
                "Exchange rates for {} processed with failed side effects: id={} published={} stored={}",
                base_currency, record.id, published, stored
            );
        }

        Ok(record)
    }
}
