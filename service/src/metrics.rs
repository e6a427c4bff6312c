//! Refresh metrics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ratekeeper_fx::{CacheStats, RefreshReport};

/// Service metrics.
pub struct ServiceMetrics {
    /// Scheduled refresh passes run.
    pub refresh_cycles: AtomicU64,
    /// Passes abandoned because the registry could not be read.
    pub refresh_aborted: AtomicU64,
    /// Currencies refreshed successfully.
    pub currencies_refreshed: AtomicU64,
    /// Currencies skipped as unknown upstream.
    pub currencies_skipped: AtomicU64,
    /// Currencies whose refresh failed.
    pub currencies_failed: AtomicU64,
    /// Wall time of the last pass in milliseconds.
    pub last_cycle_millis: AtomicU64,
    /// Base currencies held in the cache.
    pub cache_entries: AtomicU64,
    /// Cache reads served from memory.
    pub cache_hits: AtomicU64,
    /// Cache reads that fell through to the store.
    pub cache_misses: AtomicU64,
}

impl ServiceMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            refresh_cycles: AtomicU64::new(0),
            refresh_aborted: AtomicU64::new(0),
            currencies_refreshed: AtomicU64::new(0),
            currencies_skipped: AtomicU64::new(0),
            currencies_failed: AtomicU64::new(0),
            last_cycle_millis: AtomicU64::new(0),
            cache_entries: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Record a finished refresh pass.
    pub fn record_cycle(&self, report: &RefreshReport) {
        self.refresh_cycles.fetch_add(1, Ordering::Relaxed);
        if report.aborted.is_some() {
            self.refresh_aborted.fetch_add(1, Ordering::Relaxed);
        }
        self.currencies_refreshed
            .fetch_add(report.refreshed.len() as u64, Ordering::Relaxed);
        self.currencies_skipped
            .fetch_add(report.skipped.len() as u64, Ordering::Relaxed);
        self.currencies_failed
            .fetch_add(report.failed.len() as u64, Ordering::Relaxed);
        self.last_cycle_millis
            .store(report.elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    /// Copy the cache counters.
    pub fn record_cache(&self, stats: &CacheStats) {
        self.cache_entries.store(stats.entries as u64, Ordering::Relaxed);
        self.cache_hits.store(stats.hits, Ordering::Relaxed);
        self.cache_misses.store(stats.misses, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            refresh_cycles: self.refresh_cycles.load(Ordering::Relaxed),
            refresh_aborted: self.refresh_aborted.load(Ordering::Relaxed),
            currencies_refreshed: self.currencies_refreshed.load(Ordering::Relaxed),
            currencies_skipped: self.currencies_skipped.load(Ordering::Relaxed),
            currencies_failed: self.currencies_failed.load(Ordering::Relaxed),
            last_cycle_millis: self.last_cycle_millis.load(Ordering::Relaxed),
            cache_entries: self.cache_entries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let series: [(&str, &str, &str, u64); 9] = [
            ("refresh_cycles_total", "counter", "Scheduled refresh passes run", snapshot.refresh_cycles),
            ("refresh_aborted_total", "counter", "Refresh passes abandoned on registry errors", snapshot.refresh_aborted),
            ("currencies_refreshed_total", "counter", "Currencies refreshed from upstream", snapshot.currencies_refreshed),
            ("currencies_skipped_total", "counter", "Currencies skipped as unknown upstream", snapshot.currencies_skipped),
            ("currencies_failed_total", "counter", "Currencies whose refresh failed", snapshot.currencies_failed),
            ("last_cycle_duration_ms", "gauge", "Wall time of the last refresh pass", snapshot.last_cycle_millis),
            ("cache_entries", "gauge", "Base currencies held in the rate cache", snapshot.cache_entries),
            ("cache_hits_total", "counter", "Reads served from the rate cache", snapshot.cache_hits),
            ("cache_misses_total", "counter", "Reads that fell through to the store", snapshot.cache_misses),
        ];

        let mut out = String::new();
        for (name, kind, help, value) in series {
            out.push_str(&format!(
                "# HELP ratekeeper_{name} {help}\n# TYPE ratekeeper_{name} {kind}\nratekeeper_{name} {value}\n\n"
            ));
        }
        out
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub refresh_cycles: u64,
    pub refresh_aborted: u64,
    pub currencies_refreshed: u64,
    pub currencies_skipped: u64,
    pub currencies_failed: u64,
    pub last_cycle_millis: u64,
    pub cache_entries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<ServiceMetrics>;

#[cfg(test)]
mod tests {
    use super::*;
    use ratekeeper_common::CurrencyCode;
    use ratekeeper_fx::RefreshFailure;
    use std::time::Duration;

    fn code(s: &str) -> CurrencyCode {
        CurrencyCode::parse(s).unwrap()
    }

    #[test]
    fn test_record_cycle() {
        let metrics = ServiceMetrics::new();

        metrics.record_cycle(&RefreshReport {
            attempted: 3,
            refreshed: vec![code("EUR")],
            skipped: vec![code("XAU")],
            failed: vec![RefreshFailure {
                currency: code("USD"),
                reason: "timed out".to_string(),
            }],
            aborted: None,
            elapsed: Duration::from_millis(42),
        });
        metrics.record_cycle(&RefreshReport {
            aborted: Some("store down".to_string()),
            ..Default::default()
        });

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.refresh_cycles, 2);
        assert_eq!(snapshot.refresh_aborted, 1);
        assert_eq!(snapshot.currencies_refreshed, 1);
        assert_eq!(snapshot.currencies_skipped, 1);
        assert_eq!(snapshot.currencies_failed, 1);
        assert_eq!(snapshot.last_cycle_millis, 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = ServiceMetrics::new();
        metrics.record_cache(&CacheStats {
            entries: 2,
            hits: 10,
            misses: 1,
        });
        metrics.record_cycle(&RefreshReport::default());

        let output = metrics.to_prometheus();
        assert!(output.contains("ratekeeper_refresh_cycles_total 1"));
        assert!(output.contains("# TYPE ratekeeper_cache_entries gauge"));
        assert!(output.contains("ratekeeper_cache_entries 2"));
        assert!(output.contains("ratekeeper_cache_hits_total 10"));
    }
}
