use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const API_SOURCE: &str = "API";

/// One snapshot of rates for a base currency as observed by this service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateRecord {
    pub id: String,
    pub base_currency: String,
    pub timestamp: DateTime<Utc>,
    pub epoch_seconds: Option<i64>,
    pub rates: BTreeMap<String, Decimal>,
    pub source: String,
    pub provider: String,
}

impl RateRecord {
    pub fn new(
        base_currency: &str,
        timestamp: DateTime<Utc>,
        rates: BTreeMap<String, Decimal>,
        provider: impl Into<String>,
    ) -> Self {
        let mut record = Self {
            id: String::new(),
            base_currency: base_currency.to_uppercase(),
            timestamp: timestamp.trunc_subsecs(0),
            epoch_seconds: None,
            rates,
            source: API_SOURCE.to_string(),
            provider: provider.into(),
        };
        record.generate_id();
        record
    }

    pub fn with_epoch_seconds(mut self, epoch_seconds: Option<i64>) -> Self {
        self.epoch_seconds = epoch_seconds;
        self
    }

    /// Recomputes the identity from the base currency and the second-resolution timestamp.
    pub fn generate_id(&mut self) {
        self.id = record_id(&self.base_currency, &self.timestamp);
    }

    pub fn rate_for(&self, currency: &str) -> Option<Decimal> {
        self.rates.get(&currency.to_uppercase()).copied()
    }

    pub fn has_currency(&self, currency: &str) -> bool {
        self.rates.contains_key(&currency.to_uppercase())
    }

    /// A record without rates stands for a failed fetch and must not leave the ingestion path.
    pub fn is_valid(&self) -> bool {
        !self.base_currency.is_empty() && !self.rates.is_empty()
    }
}

pub fn record_id(base_currency: &str, timestamp: &DateTime<Utc>) -> String {
    format!(
        "{}_{}",
        base_currency,
        timestamp.format("%Y-%m-%dT%H:%M:%S").to_string().replace(':', "-")
    )
}
