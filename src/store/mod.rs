//! Persistence of rate records and the three read shapes served by the API.

use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{error, trace, warn};

use crate::error::StoreResult;
use crate::exchange_rate::RateRecord;

#[cfg(test)]
pub mod memory;
mod postgres;

pub use postgres::PgDocumentStore;

pub const RANGE_PAGE_SIZE: i64 = 100;
pub const RECENT_PAGE_SIZE: i64 = 50;
pub const DEFAULT_RANGE_DAYS: i64 = 7;
pub const RECENT_WINDOW_HOURS: i64 = 24;

/// Criteria for one read. Results are always ordered by `timestamp` descending.
#[derive(Debug, Clone, PartialEq)]
pub struct RateQuery {
    pub base_currency: Option<String>,
    pub lower: Bound<DateTime<Utc>>,
    pub upper: Option<DateTime<Utc>>,
    pub limit: i64,
}

impl RateQuery {
    pub fn latest(base_currency: &str) -> Self {
        Self {
            base_currency: Some(base_currency.to_string()),
            lower: Bound::Unbounded,
            upper: None,
            limit: 1,
        }
    }

    /// Both bounds inclusive.
    pub fn range(base_currency: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            base_currency: Some(base_currency.to_string()),
            lower: Bound::Included(from),
            upper: Some(to),
            limit: RANGE_PAGE_SIZE,
        }
    }

    /// Every currency, strictly newer than the recent window.
    pub fn recent(now: DateTime<Utc>) -> Self {
        Self {
            base_currency: None,
            lower: Bound::Excluded(now - Duration::hours(RECENT_WINDOW_HOURS)),
            upper: None,
            limit: RECENT_PAGE_SIZE,
        }
    }
}

/// Storage engine behind the store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts or replaces the document with `record.id`.
    async fn upsert(&self, record: &RateRecord) -> StoreResult<()>;

    async fn find(&self, query: &RateQuery) -> StoreResult<Vec<RateRecord>>;

    async fn count(&self) -> StoreResult<i64>;
}

/// Read and write path over a [`DocumentStore`].
///
/// Nothing here returns an error: writes report success as a flag and reads
/// degrade to empty results, with the failure logged.
#[derive(Clone)]
pub struct RateStore {
    documents: Arc<dyn DocumentStore>,
}

impl RateStore {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }

    pub async fn save(&self, record: &RateRecord) -> bool {
        if !record.is_valid() {
            warn!("Refusing to store exchange rates for {:?} without rates", record.base_currency);
            return false;
        }

        let mut record = record.clone();
        record.generate_id();
        match self.documents.upsert(&record).await {
            Ok(()) => {
                trace!("Saved exchange rate data to the store: {}", record.id);
                true
            }
            Err(e) => {
                error!("Error saving exchange rate data {}: {}", record.id, e);
                false
            }
        }
    }

    pub async fn find_latest(&self, base_currency: &str) -> Option<RateRecord> {
        match self.documents.find(&RateQuery::latest(base_currency)).await {
            Ok(records) => records.into_iter().next(),
            Err(e) => {
                error!("Error finding latest exchange rates for {}: {}", base_currency, e);
                None
            }
        }
    }

    /// Defaults to the last seven days when a bound is missing.
    pub async fn find_range(
        &self,
        base_currency: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Vec<RateRecord> {
        let now = Utc::now();
        let from = from.unwrap_or_else(|| now - Duration::days(DEFAULT_RANGE_DAYS));
        let to = to.unwrap_or(now);

        match self.documents.find(&RateQuery::range(base_currency, from, to)).await {
            Ok(records) => records,
            Err(e) => {
                error!("Error finding exchange rates by date range: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn find_recent(&self) -> Vec<RateRecord> {
        match self.documents.find(&RateQuery::recent(Utc::now())).await {
            Ok(records) => records,
            Err(e) => {
                error!("Error finding recent exchange rates: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn count(&self) -> i64 {
        self.documents.count().await.unwrap_or_else(|e| {
            error!("Error counting documents: {}", e);
            0
        })
    }
}
