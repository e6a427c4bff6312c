//! HTTP fetcher for Frankfurter-compatible rate APIs.
//!
//! Issues `GET {base_url}/latest?base={CODE}` and expects
//! `{"base": "EUR", "date": "2024-05-02", "rates": {"USD": 1.0713, ...}}`.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use ratekeeper_common::{CurrencyCode, RateTable};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::provider::{FetchError, FetchResult, UpstreamFetcher};

/// Public Frankfurter endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.frankfurter.app";

#[derive(Debug, Deserialize)]
struct LatestResponse {
    base: String,
    #[serde(default)]
    rates: BTreeMap<String, serde_json::Number>,
}

/// Upstream fetcher backed by a Frankfurter-style HTTP API.
pub struct FrankfurterFetcher {
    base_url: String,
    client: Client,
}

impl FrankfurterFetcher {
    /// Create a fetcher for `base_url` with a client-level request timeout.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> FetchResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| FetchError::Server {
                status: None,
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn latest_url(&self) -> String {
        format!("{}/latest", self.base_url)
    }
}

#[async_trait]
impl UpstreamFetcher for FrankfurterFetcher {
    fn name(&self) -> &str {
        "frankfurter"
    }

    async fn fetch(&self, base: &CurrencyCode) -> FetchResult<RateTable> {
        let response = self
            .client
            .get(self.latest_url())
            .query(&[("base", base.as_str())])
            .send()
            .await
            .map_err(|e| FetchError::Server {
                status: e.status().map(|s| s.as_u16()),
                message: format!("HTTP request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let body = response.text().await.map_err(|e| FetchError::Server {
            status: Some(status.as_u16()),
            message: format!("Failed to read response body: {e}"),
        })?;

        let table = parse_latest(base, &body)?;
        debug!(currency = %base, targets = table.len(), "Fetched rates from upstream");
        Ok(table)
    }
}

fn classify_status(status: StatusCode, body: String) -> FetchError {
    if status.is_client_error() {
        FetchError::Client {
            status: status.as_u16(),
            message: body,
        }
    } else {
        FetchError::Server {
            status: Some(status.as_u16()),
            message: body,
        }
    }
}

/// Parse a `/latest` payload into a rate table for `requested`.
fn parse_latest(requested: &CurrencyCode, body: &str) -> FetchResult<RateTable> {
    let payload: LatestResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::InvalidResponse(format!("JSON parse error: {e}")))?;

    let base = CurrencyCode::parse(&payload.base)
        .map_err(|e| FetchError::InvalidResponse(e.to_string()))?;
    if base != *requested {
        return Err(FetchError::InvalidResponse(format!(
            "asked for {requested}, got rates for {base}"
        )));
    }

    let mut rates = Vec::with_capacity(payload.rates.len());
    for (target, value) in payload.rates {
        let target = CurrencyCode::parse(&target)
            .map_err(|e| FetchError::InvalidResponse(e.to_string()))?;
        rates.push((target, parse_decimal(&value)?));
    }

    RateTable::fetched_now(base, rates).map_err(|e| FetchError::InvalidResponse(e.to_string()))
}

fn parse_decimal(value: &serde_json::Number) -> FetchResult<Decimal> {
    let text = value.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| FetchError::InvalidResponse(format!("bad rate {text}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn code(s: &str) -> CurrencyCode {
        CurrencyCode::parse(s).unwrap()
    }

    #[test]
    fn test_parse_latest() {
        let body = r#"{"amount":1.0,"base":"EUR","date":"2024-05-02","rates":{"GBP":0.86,"USD":1.08}}"#;

        let table = parse_latest(&code("EUR"), body).unwrap();

        assert_eq!(table.base, code("EUR"));
        assert_eq!(table.rate(&code("USD")), Some(dec!(1.08)));
        assert_eq!(table.rate(&code("GBP")), Some(dec!(0.86)));
    }

    #[test]
    fn test_parse_scientific_rate() {
        let body = r#"{"base":"IDR","rates":{"USD":6.2e-5}}"#;

        let table = parse_latest(&code("IDR"), body).unwrap();

        assert_eq!(table.rate(&code("USD")), Some(dec!(0.000062)));
    }

    #[test]
    fn test_parse_rejects_wrong_base() {
        let body = r#"{"base":"USD","rates":{"EUR":0.92}}"#;

        let err = parse_latest(&code("EUR"), body).unwrap_err();

        assert!(matches!(err, FetchError::InvalidResponse(_)));
    }

    #[test]
    fn test_parse_rejects_non_positive_rate() {
        let body = r#"{"base":"EUR","rates":{"USD":0}}"#;

        assert!(parse_latest(&code("EUR"), body).is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_latest(&code("EUR"), "<html>busy</html>").unwrap_err();

        assert!(!err.is_client_error());
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::NOT_FOUND, "not found".into()).is_client_error());
        assert!(classify_status(StatusCode::UNPROCESSABLE_ENTITY, String::new()).is_client_error());
        assert!(!classify_status(StatusCode::BAD_GATEWAY, String::new()).is_client_error());
        assert!(!classify_status(StatusCode::INTERNAL_SERVER_ERROR, String::new()).is_client_error());
    }

    #[test]
    fn test_base_url_is_normalized() {
        let fetcher = FrankfurterFetcher::new("http://localhost:8080/", Duration::from_secs(1)).unwrap();

        assert_eq!(fetcher.latest_url(), "http://localhost:8080/latest");
    }
}
