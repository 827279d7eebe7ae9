use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};

use super::{DocumentStore, RateQuery};
use crate::error::{StoreError, StoreResult};
use crate::exchange_rate::RateRecord;

/// `exchange_rates` table, one row per record identity.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct RateRow {
    id: String,
    base_currency: String,
    recorded_at: DateTime<Utc>,
    epoch_seconds: Option<i64>,
    rates: Json<BTreeMap<String, Decimal>>,
    source: String,
    provider: String,
}

impl From<RateRow> for RateRecord {
    fn from(row: RateRow) -> Self {
        RateRecord {
            id: row.id,
            base_currency: row.base_currency,
            timestamp: row.recorded_at,
            epoch_seconds: row.epoch_seconds,
            rates: row.rates.0,
            source: row.source,
            provider: row.provider,
        }
    }
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn select_for(query: &RateQuery) -> QueryBuilder<'_, Postgres> {
    let mut builder = QueryBuilder::new(
        "SELECT id, base_currency, recorded_at, epoch_seconds, rates, source, provider \
         FROM exchange_rates WHERE TRUE",
    );
    if let Some(base) = &query.base_currency {
        builder.push(" AND base_currency = ").push_bind(base);
    }
    match query.lower {
        Bound::Included(from) => {
            builder.push(" AND recorded_at >= ").push_bind(from);
        }
        Bound::Excluded(from) => {
            builder.push(" AND recorded_at > ").push_bind(from);
        }
        Bound::Unbounded => {}
    }
    if let Some(to) = query.upper {
        builder.push(" AND recorded_at <= ").push_bind(to);
    }
    builder
        .push(" ORDER BY recorded_at DESC LIMIT ")
        .push_bind(query.limit);
    builder
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn upsert(&self, record: &RateRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO exchange_rates \
             (id, base_currency, recorded_at, epoch_seconds, rates, source, provider) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (id) DO UPDATE SET \
             base_currency = EXCLUDED.base_currency, \
             recorded_at = EXCLUDED.recorded_at, \
             epoch_seconds = EXCLUDED.epoch_seconds, \
             rates = EXCLUDED.rates, \
             source = EXCLUDED.source, \
             provider = EXCLUDED.provider",
        )
        .bind(&record.id)
        .bind(&record.base_currency)
        .bind(record.timestamp)
        .bind(record.epoch_seconds)
        .bind(Json(&record.rates))
        .bind(&record.source)
        .bind(&record.provider)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(())
    }

    async fn find(&self, query: &RateQuery) -> StoreResult<Vec<RateRecord>> {
        let rows = select_for(query)
            .build_query_as::<RateRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(rows.into_iter().map(RateRecord::from).collect())
    }

    async fn count(&self) -> StoreResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM exchange_rates")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))
    }
}
