//! Refresh coordinator: the single authority over cache, store and upstream.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use ratekeeper_common::{constants, Currency, CurrencyCode, ExchangeRate, RateTable};
use tracing::{debug, error, info, instrument, warn};

use crate::cache::RateCache;
use crate::error::{FxError, FxResult};
use crate::provider::{FetchError, FetchResult, UpstreamFetcher};
use crate::registry::CurrencyRegistry;
use crate::store::{RateStore, StoreError};

/// Configuration for the refresh coordinator.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Bound on every single upstream call.
    pub upstream_timeout: Duration,
    /// Currencies refreshed concurrently during a scheduled pass.
    pub refresh_concurrency: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            upstream_timeout: constants::upstream_timeout(),
            refresh_concurrency: constants::REFRESH_CONCURRENCY,
        }
    }
}

/// A currency whose refresh failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshFailure {
    pub currency: CurrencyCode,
    pub reason: String,
}

/// Summary of one scheduled refresh pass.
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    /// Currencies the pass attempted.
    pub attempted: usize,
    /// Currencies whose store rows and cache entry were replaced.
    pub refreshed: Vec<CurrencyCode>,
    /// Currencies upstream no longer recognizes.
    pub skipped: Vec<CurrencyCode>,
    /// Currencies that failed for any other reason.
    pub failed: Vec<RefreshFailure>,
    /// Set when the registry itself could not be read.
    pub aborted: Option<String>,
    /// Wall time of the pass.
    pub elapsed: Duration,
}

impl RefreshReport {
    /// Check if every attempted currency was refreshed.
    pub fn is_clean(&self) -> bool {
        self.aborted.is_none() && self.skipped.is_empty() && self.failed.is_empty()
    }
}

enum RefreshOutcome {
    Refreshed(CurrencyCode),
    Skipped(CurrencyCode),
    Failed(RefreshFailure),
}

/// Decides whether a read is served from cache or store, and drives
/// add-currency and scheduled refresh against upstream.
///
/// Reads never reach upstream. Adds and refreshes write the store before the
/// cache, so the cache only ever holds committed rows or something newer.
pub struct RefreshCoordinator {
    store: Arc<dyn RateStore>,
    fetcher: Arc<dyn UpstreamFetcher>,
    registry: CurrencyRegistry,
    cache: RateCache,
    config: RefreshConfig,
}

impl RefreshCoordinator {
    /// Create a coordinator with an empty cache.
    pub fn new(
        store: Arc<dyn RateStore>,
        fetcher: Arc<dyn UpstreamFetcher>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            registry: CurrencyRegistry::new(Arc::clone(&store)),
            store,
            fetcher,
            cache: RateCache::new(),
            config,
        }
    }

    /// Rates for `code`, ordered by target currency.
    ///
    /// Served from cache when present; otherwise loaded from the store and
    /// cached. A currency missing from both is `CurrencyNotFound`.
    #[instrument(skip(self))]
    pub async fn get_rates(&self, code: &str) -> FxResult<Vec<ExchangeRate>> {
        let code = parse_code(code)?;
        let table = self.load_table(&code).await?;
        Ok(table.to_exchange_rates())
    }

    /// Register `code` and seed its first rate table from upstream.
    #[instrument(skip(self))]
    pub async fn add_currency(&self, code: &str) -> FxResult<()> {
        let code = parse_code(code)?;

        // Fast path only; the store's uniqueness constraint is authoritative.
        if self.registry.exists(&code).await? {
            return Err(FxError::CurrencyAlreadyExists(code));
        }

        let table = self.fetch(&code).await.map_err(|e| {
            warn!(currency = %code, error = %e, "Upstream fetch failed while adding currency");
            FxError::from_fetch(&code, e)
        })?;

        match self
            .store
            .create_currency_with_snapshots(&code, &table.to_snapshots())
            .await
        {
            Ok(_) => {}
            Err(StoreError::Conflict(_)) => {
                info!(currency = %code, "Currency was added concurrently");
                return Err(FxError::CurrencyAlreadyExists(code));
            }
            Err(e) => {
                error!(currency = %code, error = %e, "Failed to persist new currency");
                return Err(e.into());
            }
        }

        let targets = table.len();
        self.cache.put_if_newer(code.clone(), table);

        info!(currency = %code, targets, "Currency added");
        Ok(())
    }

    /// Refresh every registered currency from upstream.
    ///
    /// Never fails. Each currency is an isolated unit: a failure or a slow
    /// upstream for one only costs that currency, bounded by the upstream
    /// timeout, while the rest proceed on the worker pool.
    #[instrument(skip(self))]
    pub async fn refresh_all(&self) -> RefreshReport {
        let started = Instant::now();

        let currencies = match self.registered_currencies().await {
            Ok(currencies) => currencies,
            Err(e) => {
                error!(error = %e, "Could not read registry, skipping scheduled refresh");
                return RefreshReport {
                    aborted: Some(e.to_string()),
                    elapsed: started.elapsed(),
                    ..Default::default()
                };
            }
        };

        if currencies.is_empty() {
            warn!("No currencies registered, skipping scheduled refresh");
            return RefreshReport {
                elapsed: started.elapsed(),
                ..Default::default()
            };
        }

        info!(currencies = currencies.len(), "Refreshing exchange rates");

        let attempted = currencies.len();
        let outcomes: Vec<RefreshOutcome> = stream::iter(currencies)
            .map(|currency| self.refresh_currency(currency))
            .buffer_unordered(self.config.refresh_concurrency.max(1))
            .collect()
            .await;

        let mut report = RefreshReport {
            attempted,
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                RefreshOutcome::Refreshed(code) => report.refreshed.push(code),
                RefreshOutcome::Skipped(code) => report.skipped.push(code),
                RefreshOutcome::Failed(failure) => report.failed.push(failure),
            }
        }
        report.refreshed.sort();
        report.skipped.sort();
        report.failed.sort_by(|a, b| a.currency.cmp(&b.currency));
        report.elapsed = started.elapsed();

        info!(
            attempted = report.attempted,
            refreshed = report.refreshed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Scheduled refresh complete"
        );

        report
    }

    /// Registered codes, sorted. An empty registry is `NoCurrencies`.
    pub async fn list_currencies(&self) -> FxResult<Vec<CurrencyCode>> {
        let codes = self.registry.list_all().await?;
        if codes.is_empty() {
            return Err(FxError::NoCurrencies);
        }
        Ok(codes.into_iter().collect())
    }

    /// Load every registered currency's table from the store into the cache.
    ///
    /// Entries already cached are left alone. Returns how many were loaded.
    #[instrument(skip(self))]
    pub async fn warm_cache(&self) -> FxResult<usize> {
        let mut loaded = 0;
        for currency in self.registry.currencies().await? {
            if self.cache.has(&currency.code) {
                continue;
            }
            let table = self.read_store_table(&currency).await?;
            self.cache.get_or_insert(currency.code.clone(), table);
            loaded += 1;
        }

        info!(loaded, "Cache warmed from store");
        Ok(loaded)
    }

    /// The in-memory rate cache.
    pub fn cache(&self) -> &RateCache {
        &self.cache
    }

    /// The currency registry.
    pub fn registry(&self) -> &CurrencyRegistry {
        &self.registry
    }

    async fn load_table(&self, code: &CurrencyCode) -> FxResult<Arc<RateTable>> {
        if let Some(table) = self.cache.get(code) {
            return Ok(table);
        }

        debug!(currency = %code, "Rates not in memory, checking store");
        let currency = self
            .registry
            .get(code)
            .await?
            .ok_or_else(|| FxError::CurrencyNotFound(code.to_string()))?;

        let table = self.read_store_table(&currency).await?;
        info!(currency = %code, targets = table.len(), "Rates loaded from store into cache");

        Ok(self.cache.get_or_insert(code.clone(), table))
    }

    async fn read_store_table(&self, currency: &Currency) -> FxResult<RateTable> {
        let rows = self.store.find_snapshots_by_currency(currency).await?;
        RateTable::from_snapshots(currency.code.clone(), &rows).map_err(|e| {
            error!(currency = %currency.code, error = %e, "Stored snapshots are invalid");
            FxError::Store(StoreError::Corrupt(e.to_string()))
        })
    }

    async fn registered_currencies(&self) -> FxResult<Vec<Currency>> {
        if self.registry.count().await? == 0 {
            return Ok(Vec::new());
        }
        Ok(self.registry.currencies().await?)
    }

    async fn refresh_currency(&self, currency: Currency) -> RefreshOutcome {
        let code = currency.code.clone();

        let table = match self.fetch(&code).await {
            Ok(table) => table,
            Err(e) if e.is_client_error() => {
                warn!(currency = %code, error = %e, "Currency not found upstream, skipping");
                return RefreshOutcome::Skipped(code);
            }
            Err(e) => {
                error!(currency = %code, error = %e, "Failed to fetch exchange rates");
                return RefreshOutcome::Failed(RefreshFailure {
                    currency: code,
                    reason: e.to_string(),
                });
            }
        };

        if let Err(e) = self.store.save_snapshots(&currency, &table.to_snapshots()).await {
            error!(currency = %code, error = %e, "Failed to persist refreshed rates");
            return RefreshOutcome::Failed(RefreshFailure {
                currency: code,
                reason: e.to_string(),
            });
        }

        let targets = table.len();
        self.cache.put_if_newer(code.clone(), table);

        info!(currency = %code, targets, "Exchange rates updated");
        RefreshOutcome::Refreshed(code)
    }

    async fn fetch(&self, code: &CurrencyCode) -> FetchResult<RateTable> {
        let timeout = self.config.upstream_timeout;
        let table = match tokio::time::timeout(timeout, self.fetcher.fetch(code)).await {
            Ok(result) => result?,
            Err(_) => return Err(FetchError::Timeout(timeout)),
        };

        if table.base != *code {
            return Err(FetchError::InvalidResponse(format!(
                "{} answered with base {} for {}",
                self.fetcher.name(),
                table.base,
                code
            )));
        }

        Ok(table)
    }
}

/// Canonical code for `raw`. Input no currency could have is not found.
fn parse_code(raw: &str) -> FxResult<CurrencyCode> {
    CurrencyCode::parse(raw).map_err(|_| {
        debug!(input = raw, "Malformed currency code");
        FxError::CurrencyNotFound(CurrencyCode::normalize(raw))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockUpstreamFetcher;
    use crate::store::InMemoryRateStore;
    use rust_decimal_macros::dec;

    fn code(s: &str) -> CurrencyCode {
        CurrencyCode::parse(s).unwrap()
    }

    fn setup() -> (RefreshCoordinator, Arc<InMemoryRateStore>, Arc<MockUpstreamFetcher>) {
        let store = Arc::new(InMemoryRateStore::new());
        let fetcher = Arc::new(MockUpstreamFetcher::new("test"));
        fetcher.set_rates("EUR", &[("USD", dec!(1.08)), ("GBP", dec!(0.86))]);
        fetcher.set_rates("USD", &[("EUR", dec!(0.92))]);

        let coordinator = RefreshCoordinator::new(
            store.clone(),
            fetcher.clone(),
            RefreshConfig {
                upstream_timeout: Duration::from_millis(200),
                refresh_concurrency: 2,
            },
        );
        (coordinator, store, fetcher)
    }

    #[tokio::test]
    async fn test_get_rates_unknown_currency() {
        let (coordinator, _, fetcher) = setup();

        let result = coordinator.get_rates("EUR").await;

        assert!(matches!(result, Err(FxError::CurrencyNotFound(_))));
        assert_eq!(fetcher.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_add_then_get() {
        let (coordinator, _, _) = setup();

        coordinator.add_currency("eur").await.unwrap();
        let rates = coordinator.get_rates("EUR").await.unwrap();

        assert_eq!(rates.len(), 2);
        assert_eq!(rates[0].base_code, code("EUR"));
        assert_eq!(rates[0].target_code, code("GBP"));
        assert_eq!(rates[0].rate, dec!(0.86));
        assert_eq!(rates[1].target_code, code("USD"));
        assert_eq!(rates[1].rate, dec!(1.08));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_store() {
        let (coordinator, store, _) = setup();
        coordinator.add_currency("EUR").await.unwrap();

        coordinator.get_rates("EUR").await.unwrap();
        coordinator.get_rates("eur").await.unwrap();

        assert_eq!(store.snapshot_reads(), 0);
    }

    #[tokio::test]
    async fn test_malformed_code_is_not_found() {
        let (coordinator, store, fetcher) = setup();

        let read = coordinator.get_rates("usdt").await;
        assert!(matches!(read, Err(FxError::CurrencyNotFound(c)) if c == "USDT"));

        let add = coordinator.add_currency(" euro ").await;
        assert!(matches!(add, Err(FxError::CurrencyNotFound(c)) if c == "EURO"));

        assert_eq!(fetcher.total_calls(), 0);
        assert_eq!(store.count_currencies().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_unknown_upstream_is_not_found() {
        let (coordinator, store, _) = setup();

        let result = coordinator.add_currency("XYZ").await;

        assert!(matches!(result, Err(FxError::CurrencyNotFound(_))));
        assert_eq!(store.count_currencies().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upstream_timeout() {
        let (coordinator, store, fetcher) = setup();
        fetcher.set_delay("EUR", Duration::from_secs(5));

        let result = coordinator.add_currency("EUR").await;

        match result {
            Err(FxError::ExternalService(msg)) => assert!(msg.contains("timed out")),
            other => panic!("expected external service error, got {other:?}"),
        }
        assert_eq!(store.count_currencies().await.unwrap(), 0);
        assert!(coordinator.cache().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_all_empty_registry() {
        let (coordinator, store, fetcher) = setup();

        let report = coordinator.refresh_all().await;

        assert_eq!(report.attempted, 0);
        assert!(report.is_clean());
        assert_eq!(fetcher.total_calls(), 0);
        assert_eq!(store.snapshot_writes(), 0);
    }

    #[tokio::test]
    async fn test_refresh_all_with_unreadable_registry() {
        let (coordinator, store, _) = setup();
        coordinator.add_currency("EUR").await.unwrap();
        store.set_unavailable(true);

        let report = coordinator.refresh_all().await;

        assert!(report.aborted.is_some());
        assert_eq!(report.attempted, 0);
    }

    #[tokio::test]
    async fn test_list_currencies() {
        let (coordinator, _, _) = setup();
        assert!(matches!(
            coordinator.list_currencies().await,
            Err(FxError::NoCurrencies)
        ));

        coordinator.add_currency("USD").await.unwrap();
        coordinator.add_currency("EUR").await.unwrap();

        assert_eq!(
            coordinator.list_currencies().await.unwrap(),
            vec![code("EUR"), code("USD")]
        );
    }

    #[tokio::test]
    async fn test_warm_cache() {
        let (coordinator, store, fetcher) = setup();
        coordinator.add_currency("USD").await.unwrap();
        coordinator.add_currency("EUR").await.unwrap();
        coordinator.cache().clear();

        let loaded = coordinator.warm_cache().await.unwrap();

        assert_eq!(loaded, 2);
        assert_eq!(store.snapshot_reads(), 2);
        assert!(coordinator.cache().has(&code("USD")));
        assert_eq!(fetcher.calls_for("USD"), 1);
    }

    #[tokio::test]
    async fn test_mismatched_upstream_base_is_rejected() {
        struct WrongBase;

        #[async_trait::async_trait]
        impl UpstreamFetcher for WrongBase {
            fn name(&self) -> &str {
                "wrong-base"
            }

            async fn fetch(&self, _base: &CurrencyCode) -> FetchResult<RateTable> {
                Ok(RateTable::fetched_now(code("USD"), vec![(code("EUR"), dec!(0.92))]).unwrap())
            }
        }

        let coordinator = RefreshCoordinator::new(
            Arc::new(InMemoryRateStore::new()),
            Arc::new(WrongBase),
            RefreshConfig::default(),
        );

        let result = coordinator.add_currency("GBP").await;

        assert!(matches!(result, Err(FxError::ExternalService(_))));
    }
}
