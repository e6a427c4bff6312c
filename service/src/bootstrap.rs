//! Start-up seeding.

use ratekeeper_fx::{FxError, RefreshCoordinator};
use tracing::{debug, info, warn};

/// Register each code that is not registered yet.
///
/// Already-registered codes are skipped quietly; any other failure is logged
/// and does not stop the remaining codes. Returns how many were added.
pub async fn seed_currencies<S: AsRef<str>>(coordinator: &RefreshCoordinator, codes: &[S]) -> usize {
    let mut added = 0;
    for code in codes {
        let code = code.as_ref();
        match coordinator.add_currency(code).await {
            Ok(()) => added += 1,
            Err(FxError::CurrencyAlreadyExists(_)) => {
                debug!(currency = code, "Seed currency already registered");
            }
            Err(e) => {
                warn!(currency = code, error = %e, "Could not seed currency");
            }
        }
    }

    if added > 0 {
        info!(added, "Seed currencies registered");
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratekeeper_fx::{InMemoryRateStore, MockUpstreamFetcher, RefreshConfig};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_seed_skips_existing_and_unknown() {
        let fetcher = Arc::new(MockUpstreamFetcher::new("test"));
        fetcher.set_rates("EUR", &[("USD", dec!(1.08))]);
        fetcher.set_rates("USD", &[("EUR", dec!(0.92))]);
        let coordinator = RefreshCoordinator::new(
            Arc::new(InMemoryRateStore::new()),
            fetcher.clone(),
            RefreshConfig::default(),
        );
        coordinator.add_currency("EUR").await.unwrap();

        let added = seed_currencies(&coordinator, &["eur", "usd", "XYZ", "EURO"]).await;

        assert_eq!(added, 1);
        assert_eq!(coordinator.registry().count().await.unwrap(), 2);
        assert_eq!(fetcher.calls_for("EUR"), 1);
    }
}
