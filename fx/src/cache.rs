//! In-memory rate table cache keyed by base currency.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ratekeeper_common::{CurrencyCode, RateTable};
use tracing::debug;

/// Thread-safe keyed replace-cache of rate tables.
///
/// Entries live for the process lifetime; there is no eviction. Each entry is
/// an `Arc<RateTable>` swapped in as a unit, so a reader observes either the
/// previous table or the new one, never a mix. Keys live in independent
/// shards and writers for different bases do not contend.
pub struct RateCache {
    cache: DashMap<CurrencyCode, Arc<RateTable>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RateCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get the table for a base currency.
    pub fn get(&self, base: &CurrencyCode) -> Option<Arc<RateTable>> {
        match self.cache.get(base) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(currency = %base, "Cache hit");
                Some(Arc::clone(entry.value()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(currency = %base, "Cache miss");
                None
            }
        }
    }

    /// Replace the whole table for a base currency.
    pub fn put(&self, base: CurrencyCode, table: RateTable) -> Arc<RateTable> {
        let table = Arc::new(table);
        self.cache.insert(base.clone(), Arc::clone(&table));
        debug!(currency = %base, targets = table.len(), "Cache entry replaced");
        table
    }

    /// Replace the table unless the cached one was fetched later.
    ///
    /// Writers that commit to the store and then publish here may finish in
    /// either order; this keeps the newest fetch in the cache. Returns the
    /// table cached afterwards.
    pub fn put_if_newer(&self, base: CurrencyCode, table: RateTable) -> Arc<RateTable> {
        match self.cache.entry(base) {
            Entry::Occupied(mut entry) => {
                if entry.get().fetched_at > table.fetched_at {
                    debug!(currency = %entry.key(), "Cached table is newer, keeping it");
                    return Arc::clone(entry.get());
                }
                let table = Arc::new(table);
                entry.insert(Arc::clone(&table));
                debug!(currency = %entry.key(), targets = table.len(), "Cache entry replaced");
                table
            }
            Entry::Vacant(entry) => {
                let table = Arc::new(table);
                entry.insert(Arc::clone(&table));
                table
            }
        }
    }

    /// Insert a table only if the base has no entry yet.
    ///
    /// Returns whichever table is cached afterwards. A table loaded from the
    /// store therefore never displaces one written meanwhile by a refresh.
    pub fn get_or_insert(&self, base: CurrencyCode, table: RateTable) -> Arc<RateTable> {
        let entry = self
            .cache
            .entry(base)
            .or_insert_with(|| Arc::new(table));
        Arc::clone(entry.value())
    }

    /// Check if a base currency has a cached table.
    pub fn has(&self, base: &CurrencyCode) -> bool {
        self.cache.contains_key(base)
    }

    /// Snapshot of every cached table.
    ///
    /// Tables are shared with the cache, but the returned map itself is
    /// detached: later `put` calls do not change it.
    pub fn all_entries(&self) -> HashMap<CurrencyCode, Arc<RateTable>> {
        self.cache
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Drop every entry, as after a restart.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Get the number of cached base currencies.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.cache.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for RateCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}
