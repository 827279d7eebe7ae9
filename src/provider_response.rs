use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde::Serialize;

/// Body returned by `GET {provider}/{base}`.
#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ProviderResponse {
    pub provider: Option<String>,
    pub warning: Option<String>,
    pub terms: Option<String>,
    pub base: Option<String>,
    pub date: Option<String>,
    pub time_last_updated: Option<i64>,
    pub rates: Option<BTreeMap<String, Decimal>>,
}
