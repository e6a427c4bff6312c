//! The set of currencies the service tracks.

use std::collections::BTreeSet;
use std::sync::Arc;

use ratekeeper_common::{Currency, CurrencyCode};

use crate::store::{RateStore, StoreResult};

/// Authority over which currencies exist.
///
/// Backed by the durable store only. The rate cache is never consulted: a
/// currency can be registered and still have no cached table, for instance
/// right after a restart.
pub struct CurrencyRegistry {
    store: Arc<dyn RateStore>,
}

impl CurrencyRegistry {
    /// Create a registry over `store`.
    pub fn new(store: Arc<dyn RateStore>) -> Self {
        Self { store }
    }

    /// Check if `code` is registered.
    pub async fn exists(&self, code: &CurrencyCode) -> StoreResult<bool> {
        Ok(self.store.find_currency_by_code(code).await?.is_some())
    }

    /// Look up a registered currency.
    pub async fn get(&self, code: &CurrencyCode) -> StoreResult<Option<Currency>> {
        self.store.find_currency_by_code(code).await
    }

    /// Register `code`. Duplicates are rejected by the store with a conflict;
    /// callers that want a friendlier error check [`exists`](Self::exists) first.
    pub async fn add(&self, code: &CurrencyCode) -> StoreResult<Currency> {
        self.store.save_currency(code).await
    }

    /// Every registered code.
    pub async fn list_all(&self) -> StoreResult<BTreeSet<CurrencyCode>> {
        Ok(self
            .store
            .list_currencies()
            .await?
            .into_iter()
            .map(|c| c.code)
            .collect())
    }

    /// Every registered currency record.
    pub async fn currencies(&self) -> StoreResult<Vec<Currency>> {
        self.store.list_currencies().await
    }

    /// Number of registered currencies.
    pub async fn count(&self) -> StoreResult<u64> {
        self.store.count_currencies().await
    }
}
