//! Time utilities and defaults for Ratekeeper.

use chrono::{DateTime, Utc};

/// Timing defaults shared by the service and the core.
pub mod constants {
    use std::time::Duration;

    /// Default interval between scheduled refresh passes (1 hour).
    pub fn refresh_interval() -> Duration {
        Duration::from_secs(60 * 60)
    }

    /// Default bound on a single upstream call (10 seconds).
    pub fn upstream_timeout() -> Duration {
        Duration::from_secs(10)
    }

    /// Default number of currencies refreshed concurrently.
    pub const REFRESH_CONCURRENCY: usize = 4;
}

/// A timestamp, always UTC.
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}
