//! Ratekeeper FX Core
//!
//! Keeps an in-memory rate cache, a durable rate store and an upstream rate
//! API coherent under concurrent reads, adds and scheduled refresh.
//!
//! # Features
//!
//! - Keyed replace-cache of whole rate tables per base currency
//! - Lazy cache population from the durable store on read miss
//! - Add-currency seeding from upstream with store-enforced uniqueness
//! - Scheduled refresh with per-currency failure isolation and timeouts
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ratekeeper_fx::{FrankfurterFetcher, InMemoryRateStore, RefreshConfig, RefreshCoordinator};
//!
//! let fetcher = FrankfurterFetcher::new("https://api.frankfurter.app", Duration::from_secs(10))?;
//! let coordinator = RefreshCoordinator::new(
//!     Arc::new(InMemoryRateStore::new()),
//!     Arc::new(fetcher),
//!     RefreshConfig::default(),
//! );
//!
//! coordinator.add_currency("eur").await?;
//! let rates = coordinator.get_rates("EUR").await?;
//! let report = coordinator.refresh_all().await;
//! ```

pub mod cache;
pub mod engine;
pub mod error;
pub mod frankfurter;
pub mod provider;
pub mod registry;
pub mod store;

pub use cache::{CacheStats, RateCache};
pub use engine::{RefreshConfig, RefreshCoordinator, RefreshFailure, RefreshReport};
pub use error::{FxError, FxResult};
pub use frankfurter::FrankfurterFetcher;
pub use provider::{FetchError, FetchResult, UpstreamFetcher};
pub use registry::CurrencyRegistry;
pub use store::{InMemoryRateStore, RateStore, StoreError, StoreResult};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockUpstreamFetcher;
