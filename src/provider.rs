use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::ProviderError;
use crate::provider_response::ProviderResponse;

/// Source of raw rate data for a base currency.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, base_currency: &str) -> Result<ProviderResponse, ProviderError>;
}

pub struct HttpProviderClient {
    client: Client,
    base_url: String,
    name: String,
}

impl HttpProviderClient {
    pub fn new(base_url: &str, name: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            name: name.to_string(),
        })
    }

    fn url(&self, base_currency: &str) -> String {
        format!("{}/{}", self.base_url, base_currency)
    }

    async fn load_json(&self, url: &str) -> Result<String, ProviderError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ProviderError::Status(resp.status().as_u16()));
        }

        resp.text()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, base_currency: &str) -> Result<ProviderResponse, ProviderError> {
        let url = self.url(base_currency);
        let text = self.load_json(&url).await?;
        parse_response(&text)
    }
}

pub fn parse_response(text: &str) -> Result<ProviderResponse, ProviderError> {
    serde_json::from_str(text).map_err(|e| ProviderError::Malformed(e.to_string()))
}

#[cfg(test)]
pub mod testing {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;

    use rust_decimal::Decimal;

    use super::*;

    type FetchHook = Box<dyn Fn(&str) + Send + Sync>;

    /// Serves canned responses and records the order of requests.
    #[derive(Default)]
    pub struct StubProvider {
        responses: HashMap<String, Vec<(String, Decimal)>>,
        calls: Mutex<Vec<String>>,
        on_fetch: Mutex<Option<FetchHook>>,
    }

    impl StubProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_rates(mut self, base: &str, rates: &[(&str, Decimal)]) -> Self {
            self.responses.insert(
                base.to_string(),
                rates.iter().map(|(c, r)| (c.to_string(), *r)).collect(),
            );
            self
        }

        pub fn on_fetch(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
            *self.on_fetch.lock().unwrap() = Some(Box::new(hook));
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProviderClient for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn fetch(&self, base_currency: &str) -> Result<ProviderResponse, ProviderError> {
            self.calls.lock().unwrap().push(base_currency.to_string());
            if let Some(hook) = self.on_fetch.lock().unwrap().as_ref() {
                hook(base_currency);
            }
            match self.responses.get(base_currency) {
                Some(rates) => Ok(ProviderResponse {
                    base: Some(base_currency.to_string()),
                    rates: Some(rates.iter().cloned().collect::<BTreeMap<_, _>>()),
                    ..Default::default()
                }),
                None => Err(ProviderError::Status(404)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_url_without_double_slash() {
        let client =
            HttpProviderClient::new("https://api.example.com/v4/latest/", "test", Duration::from_secs(1)).unwrap();
        assert_eq!(client.url("USD"), "https://api.example.com/v4/latest/USD");
    }

    #[test]
    fn unparsable_body_is_malformed() {
        let err = parse_response("<html>oops</html>").unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[test]
    fn body_without_rates_parses() {
        let response = parse_response(r#"{"base":"XYZ","rates":{}}"#).unwrap();
        assert_eq!(response.rates.map(|r| r.len()), Some(0));
    }

    #[tokio::test]
    async fn unreachable_host_is_reported() {
        let client = HttpProviderClient::new("http://127.0.0.1:1", "test", Duration::from_millis(500)).unwrap();
        let err = client.fetch("USD").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unreachable(_)));
    }
}
