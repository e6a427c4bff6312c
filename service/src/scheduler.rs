//! Periodic refresh driver.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use ratekeeper_fx::{RefreshCoordinator, RefreshReport};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::metrics::SharedMetrics;
use crate::state::SchedulerState;

/// Runs `refresh_all` on a fixed interval until stopped.
///
/// The first pass starts immediately. A pass that overruns the interval
/// delays the next tick rather than stacking passes, and a shutdown request
/// is honoured only between passes so an in-flight pass always completes.
pub struct RefreshScheduler {
    coordinator: Arc<RefreshCoordinator>,
    metrics: SharedMetrics,
    interval: Duration,
    state: RwLock<SchedulerState>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl RefreshScheduler {
    pub fn new(
        coordinator: Arc<RefreshCoordinator>,
        metrics: SharedMetrics,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Self {
            coordinator,
            metrics,
            interval,
            state: RwLock::new(SchedulerState::Idle),
            shutdown_tx,
            shutdown_rx: Mutex::new(Some(shutdown_rx)),
        }
    }

    /// Drive the refresh loop until [`stop`](Self::stop) is called.
    #[instrument(skip(self), fields(interval_secs = self.interval.as_secs()))]
    pub async fn run(&self) {
        let receiver = self.shutdown_rx.lock().take();
        let Some(mut shutdown_rx) = receiver else {
            warn!("Refresh scheduler already started");
            return;
        };

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Refresh scheduler started");

        loop {
            self.transition(SchedulerState::Waiting);
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {}
            }

            self.transition(SchedulerState::Refreshing);
            self.run_once().await;
        }

        *self.state.write() = SchedulerState::Stopped;
        info!("Refresh scheduler stopped");
    }

    /// Run a single refresh pass and record it.
    pub async fn run_once(&self) -> RefreshReport {
        let report = self.coordinator.refresh_all().await;

        self.metrics.record_cycle(&report);
        self.metrics.record_cache(&self.coordinator.cache().stats());
        debug!(metrics = %self.metrics.to_prometheus(), "Refresh metrics");

        report
    }

    /// Ask the loop to exit after the current pass.
    pub fn stop(&self) {
        *self.state.write() = SchedulerState::ShuttingDown;
        let _ = self.shutdown_tx.try_send(());
        info!("Refresh scheduler shutdown requested");
    }

    /// Get the current scheduler state.
    pub fn state(&self) -> SchedulerState {
        *self.state.read()
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    fn transition(&self, next: SchedulerState) {
        let mut state = self.state.write();
        if *state != SchedulerState::ShuttingDown {
            *state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ServiceMetrics;
    use ratekeeper_fx::{InMemoryRateStore, MockUpstreamFetcher, RefreshConfig};
    use rust_decimal_macros::dec;

    async fn setup(interval: Duration) -> (Arc<RefreshScheduler>, Arc<MockUpstreamFetcher>) {
        let fetcher = Arc::new(MockUpstreamFetcher::new("test"));
        fetcher.set_rates("EUR", &[("USD", dec!(1.08))]);

        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::new(InMemoryRateStore::new()),
            fetcher.clone(),
            RefreshConfig {
                upstream_timeout: Duration::from_secs(1),
                refresh_concurrency: 2,
            },
        ));
        coordinator.add_currency("EUR").await.unwrap();

        let scheduler = Arc::new(RefreshScheduler::new(
            coordinator,
            Arc::new(ServiceMetrics::new()),
            interval,
        ));
        (scheduler, fetcher)
    }

    #[tokio::test]
    async fn test_run_once_records_metrics() {
        let (scheduler, fetcher) = setup(Duration::from_secs(3600)).await;

        let report = scheduler.run_once().await;

        assert!(report.is_clean());
        let snapshot = scheduler.metrics().snapshot();
        assert_eq!(snapshot.refresh_cycles, 1);
        assert_eq!(snapshot.currencies_refreshed, 1);
        assert_eq!(snapshot.cache_entries, 1);
        assert_eq!(fetcher.calls_for("EUR"), 2);
    }

    #[tokio::test]
    async fn test_stop_before_run_exits_without_refreshing() {
        let (scheduler, fetcher) = setup(Duration::from_secs(3600)).await;

        scheduler.stop();
        scheduler.run().await;

        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(scheduler.metrics().snapshot().refresh_cycles, 0);
        assert_eq!(fetcher.calls_for("EUR"), 1);
    }

    #[tokio::test]
    async fn test_loop_ticks_until_stopped() {
        let (scheduler, _) = setup(Duration::from_millis(30)).await;

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();

        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(scheduler.metrics().snapshot().refresh_cycles >= 2);
    }

    #[tokio::test]
    async fn test_in_flight_pass_completes_before_shutdown() {
        let (scheduler, fetcher) = setup(Duration::from_secs(3600)).await;
        fetcher.set_delay("EUR", Duration::from_millis(150));

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(scheduler.state(), SchedulerState::Refreshing);

        scheduler.stop();
        handle.await.unwrap();

        let snapshot = scheduler.metrics().snapshot();
        assert_eq!(snapshot.refresh_cycles, 1);
        assert_eq!(snapshot.currencies_refreshed, 1);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn test_second_run_is_rejected() {
        let (scheduler, _) = setup(Duration::from_secs(3600)).await;
        scheduler.stop();
        scheduler.run().await;

        // Receiver is gone; returns immediately.
        scheduler.run().await;
        assert_eq!(scheduler.metrics().snapshot().refresh_cycles, 0);
    }
}
