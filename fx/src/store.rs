//! Durable rate store interface and the in-memory implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
#[cfg(any(test, feature = "test-utils"))]
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use ratekeeper_common::{Currency, CurrencyCode, CurrencyId, RateSnapshot};
use thiserror::Error;
use tracing::debug;

/// Failure of a durable store operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The store could not be reached or the operation failed.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be mapped back to domain values.
    #[error("Corrupt store data: {0}")]
    Corrupt(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable home of registered currencies and their rate snapshots.
///
/// The store is the final authority on currency uniqueness: `save_currency`
/// must fail with [`StoreError::Conflict`] when the code is already present,
/// however many callers race to add it.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Look up a registered currency.
    async fn find_currency_by_code(&self, code: &CurrencyCode) -> StoreResult<Option<Currency>>;

    /// Register a currency. Conflicts if the code already exists.
    async fn save_currency(&self, code: &CurrencyCode) -> StoreResult<Currency>;

    /// All snapshot rows whose base is `currency`.
    async fn find_snapshots_by_currency(&self, currency: &Currency) -> StoreResult<Vec<RateSnapshot>>;

    /// Replace the snapshot set of `currency` with `snapshots`.
    async fn save_snapshots(&self, currency: &Currency, snapshots: &[RateSnapshot]) -> StoreResult<()>;

    /// Number of registered currencies.
    async fn count_currencies(&self) -> StoreResult<u64>;

    /// Every registered currency.
    async fn list_currencies(&self) -> StoreResult<Vec<Currency>>;

    /// Register a currency together with its first snapshot set.
    ///
    /// Implementations should make this one unit of work; the default simply
    /// chains the two saves.
    async fn create_currency_with_snapshots(
        &self,
        code: &CurrencyCode,
        snapshots: &[RateSnapshot],
    ) -> StoreResult<Currency> {
        let currency = self.save_currency(code).await?;
        self.save_snapshots(&currency, snapshots).await?;
        Ok(currency)
    }
}

#[derive(Default)]
struct StoreState {
    currencies: HashMap<CurrencyCode, Currency>,
    snapshots: HashMap<CurrencyId, Vec<RateSnapshot>>,
}

/// Process-local [`RateStore`].
///
/// All state sits behind one lock, so the uniqueness check and the insert of
/// a currency happen atomically.
pub struct InMemoryRateStore {
    state: RwLock<StoreState>,
    snapshot_reads: AtomicU64,
    snapshot_writes: AtomicU64,
    unavailable: AtomicBool,
    fail_writes: AtomicBool,
    #[cfg(any(test, feature = "test-utils"))]
    read_delay: RwLock<Option<Duration>>,
}

impl InMemoryRateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            snapshot_reads: AtomicU64::new(0),
            snapshot_writes: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            #[cfg(any(test, feature = "test-utils"))]
            read_delay: RwLock::new(None),
        }
    }

    /// Number of snapshot reads served so far.
    pub fn snapshot_reads(&self) -> u64 {
        self.snapshot_reads.load(Ordering::Relaxed)
    }

    /// Number of snapshot sets written so far.
    pub fn snapshot_writes(&self) -> u64 {
        self.snapshot_writes.load(Ordering::Relaxed)
    }

    /// Make every operation fail with [`StoreError::Unavailable`].
    #[cfg(any(test, feature = "test-utils"))]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every write fail with [`StoreError::Unavailable`]; reads still work.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Sleep after reading snapshot rows and before returning them.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.read_delay.write() = delay;
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(())
    }

    fn check_writable(&self) -> StoreResult<()> {
        self.check_available()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store rejected write".to_string()));
        }
        Ok(())
    }

    fn insert_currency(state: &mut StoreState, code: &CurrencyCode) -> StoreResult<Currency> {
        if state.currencies.contains_key(code) {
            return Err(StoreError::Conflict(format!("currency {code} already exists")));
        }
        let currency = Currency::new(code.clone());
        state.currencies.insert(code.clone(), currency.clone());
        Ok(currency)
    }

    fn replace_snapshots(
        state: &mut StoreState,
        currency: &Currency,
        snapshots: &[RateSnapshot],
    ) -> StoreResult<()> {
        if !state.currencies.contains_key(&currency.code) {
            return Err(StoreError::Corrupt(format!(
                "snapshots written for unregistered currency {}",
                currency.code
            )));
        }
        if let Some(stray) = snapshots.iter().find(|s| s.base != currency.code) {
            return Err(StoreError::Corrupt(format!(
                "snapshot base {} does not match {}",
                stray.base, currency.code
            )));
        }
        state.snapshots.insert(currency.id, snapshots.to_vec());
        Ok(())
    }
}

impl Default for InMemoryRateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateStore for InMemoryRateStore {
    async fn find_currency_by_code(&self, code: &CurrencyCode) -> StoreResult<Option<Currency>> {
        self.check_available()?;
        Ok(self.state.read().currencies.get(code).cloned())
    }

    async fn save_currency(&self, code: &CurrencyCode) -> StoreResult<Currency> {
        self.check_writable()?;
        let currency = Self::insert_currency(&mut self.state.write(), code)?;
        debug!(currency = %code, "Currency saved");
        Ok(currency)
    }

    async fn find_snapshots_by_currency(&self, currency: &Currency) -> StoreResult<Vec<RateSnapshot>> {
        self.check_available()?;
        self.snapshot_reads.fetch_add(1, Ordering::Relaxed);
        let rows = self
            .state
            .read()
            .snapshots
            .get(&currency.id)
            .cloned()
            .unwrap_or_default();

        #[cfg(any(test, feature = "test-utils"))]
        {
            let delay = *self.read_delay.read();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }

        Ok(rows)
    }

    async fn save_snapshots(&self, currency: &Currency, snapshots: &[RateSnapshot]) -> StoreResult<()> {
        self.check_writable()?;
        Self::replace_snapshots(&mut self.state.write(), currency, snapshots)?;
        self.snapshot_writes.fetch_add(1, Ordering::Relaxed);
        debug!(currency = %currency.code, rows = snapshots.len(), "Snapshots replaced");
        Ok(())
    }

    async fn count_currencies(&self) -> StoreResult<u64> {
        self.check_available()?;
        Ok(self.state.read().currencies.len() as u64)
    }

    async fn list_currencies(&self) -> StoreResult<Vec<Currency>> {
        self.check_available()?;
        let mut currencies: Vec<Currency> = self.state.read().currencies.values().cloned().collect();
        currencies.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(currencies)
    }

    async fn create_currency_with_snapshots(
        &self,
        code: &CurrencyCode,
        snapshots: &[RateSnapshot],
    ) -> StoreResult<Currency> {
        self.check_writable()?;
        let mut state = self.state.write();
        let currency = Self::insert_currency(&mut state, code)?;
        if let Err(e) = Self::replace_snapshots(&mut state, &currency, snapshots) {
            state.currencies.remove(code);
            return Err(e);
        }
        drop(state);

        self.snapshot_writes.fetch_add(1, Ordering::Relaxed);
        debug!(currency = %code, rows = snapshots.len(), "Currency saved with snapshots");
        Ok(currency)
    }
}
