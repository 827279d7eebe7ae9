//! Read API over stored rates, plus live fetch and manual refresh.

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError, web};
use chrono::{DateTime, NaiveDateTime, Utc};
use log::info;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ingestion::IngestionService;
use crate::store::RateStore;

pub struct AppState {
    pub ingestion: Arc<IngestionService>,
    pub store: RateStore,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpecificRate {
    pub base_currency: String,
    pub target_currency: String,
    pub rate: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    status: &'static str,
    total_stored_rates: i64,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    from: Option<String>,
    to: Option<String>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    // Fixed segments first so they are not taken for a currency code.
    cfg.service(
        web::scope("/rates")
            .route("/recent", web::get().to(recent_rates))
            .route("/health", web::get().to(health))
            .route("/{base}", web::get().to(current_rates))
            .route("/{base}/latest", web::get().to(latest_rates))
            .route("/{base}/rate/{target}", web::get().to(specific_rate))
            .route("/{base}/history", web::get().to(historical_rates))
            .route("/{base}/refresh", web::post().to(refresh_rates)),
    );
}

async fn current_rates(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let base = path.into_inner().to_uppercase();
    info!("Request for current exchange rates with base currency: {}", base);

    let record = state
        .ingestion
        .ingest(&base)
        .await
        .map_err(|e| ApiError::NotFound(e.to_string()))?;
    Ok(HttpResponse::Ok().json(record))
}

async fn latest_rates(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let base = path.into_inner().to_uppercase();
    info!("Request for latest stored exchange rates with base currency: {}", base);

    let record = state
        .store
        .find_latest(&base)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no stored rates for {}", base)))?;
    Ok(HttpResponse::Ok().json(record))
}

async fn specific_rate(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    let (base, target) = path.into_inner();
    let (base, target) = (base.to_uppercase(), target.to_uppercase());
    info!("Request for specific rate: {} to {}", base, target);

    let record = state
        .store
        .find_latest(&base)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no stored rates for {}", base)))?;
    if !record.has_currency(&target) {
        return Err(ApiError::NotFound(format!("no {} rate for {}", target, base)));
    }
    let rate = record.rates[&target];

    Ok(HttpResponse::Ok().json(SpecificRate {
        base_currency: base,
        target_currency: target,
        rate,
        timestamp: record.timestamp,
    }))
}

async fn historical_rates(
    state: web::Data<AppState>,
    path: web::Path<String>,
    params: web::Query<HistoryParams>,
) -> Result<HttpResponse, ApiError> {
    let base = path.into_inner().to_uppercase();
    let from = params.from.as_deref().map(parse_instant).transpose()?;
    let to = params.to.as_deref().map(parse_instant).transpose()?;
    info!("Request for historical rates for {}: from {:?} to {:?}", base, from, to);

    let records = state.store.find_range(&base, from, to).await;
    Ok(HttpResponse::Ok().json(records))
}

async fn recent_rates(state: web::Data<AppState>) -> HttpResponse {
    info!("Request for all recent exchange rates");
    HttpResponse::Ok().json(state.store.find_recent().await)
}

async fn refresh_rates(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let base = path.into_inner().to_uppercase();
    info!("Manual refresh requested for currency: {}", base);

    let record = state
        .ingestion
        .ingest(&base)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(HttpResponse::Ok().json(record))
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(Health {
        status: "UP",
        total_stored_rates: state.store.count().await,
        timestamp: Utc::now(),
    })
}

/// RFC 3339, or an ISO-8601 local date-time read as UTC.
fn parse_instant(value: &str) -> Result<DateTime<Utc>, ApiError> {
    let value = value.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ApiError::BadRequest(format!("invalid date-time {:?}", value)))
}
