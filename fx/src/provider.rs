//! Upstream rate fetcher trait and test double.

use std::time::Duration;

use async_trait::async_trait;
use ratekeeper_common::{CurrencyCode, RateTable};
use thiserror::Error;

/// Failure of an upstream fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Upstream rejected the request (4xx): the code is unknown to it.
    #[error("Upstream rejected request ({status}): {message}")]
    Client { status: u16, message: String },

    /// Upstream or transport fault.
    #[error("Upstream failure{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Server { status: Option<u16>, message: String },

    /// No answer within the allotted time.
    #[error("Upstream call timed out after {0:?}")]
    Timeout(Duration),

    /// Upstream answered with something that is not a valid rate table.
    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),
}

impl FetchError {
    /// Check if upstream does not recognize the requested code.
    ///
    /// This is the single classification used by both the add-currency and
    /// the scheduled refresh path.
    pub fn is_client_error(&self) -> bool {
        matches!(self, FetchError::Client { .. })
    }
}

/// Result type for upstream fetches.
pub type FetchResult<T> = Result<T, FetchError>;

/// Source of full rate tables for a base currency.
#[async_trait]
pub trait UpstreamFetcher: Send + Sync {
    /// Get the fetcher name.
    fn name(&self) -> &str;

    /// Fetch every target rate for `base`.
    async fn fetch(&self, base: &CurrencyCode) -> FetchResult<RateTable>;
}

/// Mock upstream fetcher for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockUpstreamFetcher {
    name: String,
    responses: dashmap::DashMap<CurrencyCode, FetchResult<Vec<(CurrencyCode, rust_decimal::Decimal)>>>,
    delays: dashmap::DashMap<CurrencyCode, Duration>,
    calls: dashmap::DashMap<CurrencyCode, usize>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockUpstreamFetcher {
    /// Create a mock that knows no currencies; unknown codes answer 404.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: dashmap::DashMap::new(),
            delays: dashmap::DashMap::new(),
            calls: dashmap::DashMap::new(),
        }
    }

    /// Serve these rates for `base`.
    pub fn set_rates(&self, base: &str, rates: &[(&str, rust_decimal::Decimal)]) {
        let rates = rates
            .iter()
            .map(|(target, rate)| (mock_code(target), *rate))
            .collect();
        self.responses.insert(mock_code(base), Ok(rates));
    }

    /// Fail every fetch of `base` with `error`.
    pub fn set_error(&self, base: &str, error: FetchError) {
        self.responses.insert(mock_code(base), Err(error));
    }

    /// Sleep before answering fetches of `base`.
    pub fn set_delay(&self, base: &str, delay: Duration) {
        self.delays.insert(mock_code(base), delay);
    }

    /// Number of fetches issued for `base`.
    pub fn calls_for(&self, base: &str) -> usize {
        self.calls.get(&mock_code(base)).map(|c| *c).unwrap_or(0)
    }

    /// Number of fetches issued overall.
    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| *c.value()).sum()
    }
}

#[cfg(any(test, feature = "test-utils"))]
fn mock_code(code: &str) -> CurrencyCode {
    CurrencyCode::parse(code).expect("mock currency codes must be valid")
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl UpstreamFetcher for MockUpstreamFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, base: &CurrencyCode) -> FetchResult<RateTable> {
        *self.calls.entry(base.clone()).or_insert(0) += 1;

        let delay = self.delays.get(base).map(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let response = self.responses.get(base).map(|r| r.clone());
        match response {
            Some(Ok(rates)) => RateTable::fetched_now(base.clone(), rates)
                .map_err(|e| FetchError::InvalidResponse(e.to_string())),
            Some(Err(e)) => Err(e),
            None => Err(FetchError::Client {
                status: 404,
                message: format!("not found: {base}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_mock_fetcher() {
        let fetcher = MockUpstreamFetcher::new("test");
        fetcher.set_rates("EUR", &[("USD", dec!(1.08)), ("GBP", dec!(0.86))]);

        let table = fetcher.fetch(&mock_code("EUR")).await.unwrap();

        assert_eq!(table.base, mock_code("EUR"));
        assert_eq!(table.rate(&mock_code("USD")), Some(dec!(1.08)));
        assert_eq!(fetcher.calls_for("eur"), 1);
    }

    #[tokio::test]
    async fn test_mock_fetcher_unknown_code_is_client_error() {
        let fetcher = MockUpstreamFetcher::new("test");

        let err = fetcher.fetch(&mock_code("XYZ")).await.unwrap_err();

        assert!(err.is_client_error());
    }

    #[test]
    fn test_classification() {
        assert!(FetchError::Client { status: 422, message: "bad".into() }.is_client_error());
        assert!(!FetchError::Server { status: Some(503), message: "down".into() }.is_client_error());
        assert!(!FetchError::Server { status: None, message: "reset".into() }.is_client_error());
        assert!(!FetchError::Timeout(Duration::from_secs(1)).is_client_error());
        assert!(!FetchError::InvalidResponse("garbage".into()).is_client_error());
    }

    #[test]
    fn test_server_error_display() {
        let with_status = FetchError::Server { status: Some(502), message: "bad gateway".into() };
        let without = FetchError::Server { status: None, message: "connection reset".into() };

        assert_eq!(with_status.to_string(), "Upstream failure (502): bad gateway");
        assert_eq!(without.to_string(), "Upstream failure: connection reset");
    }
}
