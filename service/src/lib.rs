//! Ratekeeper service
//!
//! Wires the refresh coordinator to a store and an upstream, seeds the
//! registry at start-up and drives the periodic refresh.

pub mod bootstrap;
pub mod config;
pub mod metrics;
pub mod scheduler;
pub mod state;

pub use bootstrap::seed_currencies;
pub use config::{ConfigError, ServiceConfig};
pub use metrics::{ServiceMetrics, SharedMetrics};
pub use scheduler::RefreshScheduler;
pub use state::SchedulerState;
