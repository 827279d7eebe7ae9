use std::collections::HashMap;
use std::ops::Bound;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{DocumentStore, RateQuery};
use crate::error::{StoreError, StoreResult};
use crate::exchange_rate::RateRecord;

#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<String, RateRecord>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<RateRecord> {
        self.documents.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.documents.lock().unwrap().len()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn upsert(&self, record: &RateRecord) -> StoreResult<()> {
        self.documents
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn find(&self, query: &RateQuery) -> StoreResult<Vec<RateRecord>> {
        let mut hits: Vec<RateRecord> = self
            .documents
            .lock()
            .unwrap()
            .values()
            .filter(|record| matches(query, record))
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        hits.truncate(query.limit.max(0) as usize);
        Ok(hits)
    }

    async fn count(&self) -> StoreResult<i64> {
        Ok(self.len() as i64)
    }
}

fn matches(query: &RateQuery, record: &RateRecord) -> bool {
    if query
        .base_currency
        .as_ref()
        .is_some_and(|base| &record.base_currency != base)
    {
        return false;
    }
    let above = match query.lower {
        Bound::Included(from) => record.timestamp >= from,
        Bound::Excluded(from) => record.timestamp > from,
        Bound::Unbounded => true,
    };
    above && query.upper.is_none_or(|to| record.timestamp <= to)
}

/// Every call fails, as when the storage engine is down.
pub struct FailingDocumentStore;

#[async_trait]
impl DocumentStore for FailingDocumentStore {
    async fn upsert(&self, _record: &RateRecord) -> StoreResult<()> {
        Err(StoreError::Write("connection refused".to_string()))
    }

    async fn find(&self, _query: &RateQuery) -> StoreResult<Vec<RateRecord>> {
        Err(StoreError::Query("connection refused".to_string()))
    }

    async fn count(&self) -> StoreResult<i64> {
        Err(StoreError::Query("connection refused".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    use super::*;
    use crate::store::RECENT_WINDOW_HOURS;

    #[test]
    fn recent_lower_bound_is_exclusive() {
        let now = Utc::now();
        let query = RateQuery::recent(now);
        let mut edge = RateRecord::new("USD", now, BTreeMap::from([("EUR".to_string(), dec!(0.92))]), "test");
        edge.timestamp = now - Duration::hours(RECENT_WINDOW_HOURS);
        assert!(!matches(&query, &edge));
        edge.timestamp += Duration::seconds(1);
        assert!(matches(&query, &edge));
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let now = Utc::now();
        let query = RateQuery::range("USD", now - Duration::hours(1), now);
        let mut record = RateRecord::new("USD", now, BTreeMap::new(), "test");
        record.timestamp = now;
        assert!(matches(&query, &record));
        record.timestamp = now - Duration::hours(1);
        assert!(matches(&query, &record));
        record.base_currency = "EUR".to_string();
        assert!(!matches(&query, &record));
    }
}
