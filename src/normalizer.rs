use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::exchange_rate::RateRecord;
use crate::provider_response::ProviderResponse;

pub const DEFAULT_PROVIDER: &str = "exchangerate-api.com";

/// Turns a provider body into a record stamped with `observed_at`.
///
/// The provider's own date and update time are kept only as `epoch_seconds`.
/// Returns `None` when the body carries no rates.
pub fn normalize(
    response: ProviderResponse,
    requested_base: &str,
    observed_at: DateTime<Utc>,
    default_provider: &str,
) -> Option<RateRecord> {
    let rates: BTreeMap<_, _> = response
        .rates?
        .into_iter()
        .map(|(code, rate)| (code.trim().to_uppercase(), rate))
        .filter(|(code, _)| !code.is_empty())
        .collect();
    if rates.is_empty() {
        return None;
    }

    let base = response
        .base
        .filter(|base| !base.trim().is_empty())
        .unwrap_or_else(|| requested_base.to_string());
    let provider = response
        .provider
        .filter(|provider| !provider.trim().is_empty())
        .unwrap_or_else(|| default_provider.to_string());

    let record = RateRecord::new(base.trim(), observed_at, rates, provider)
        .with_epoch_seconds(response.time_last_updated);
    Some(record)
}
