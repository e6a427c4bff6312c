//! Service configuration.

use std::time::Duration;

use ratekeeper_common::{constants, CurrencyCode};
use ratekeeper_fx::RefreshConfig;
use thiserror::Error;

/// Default upstream endpoint.
pub const DEFAULT_UPSTREAM_URL: &str = ratekeeper_fx::frankfurter::DEFAULT_BASE_URL;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has an unparsable value {value:?}")]
    Unparsable { name: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("Upstream URL must start with http:// or https://, got {0:?}")]
    UpstreamUrl(String),

    #[error("Upstream timeout ({timeout:?}) must be shorter than the refresh interval ({interval:?})")]
    TimeoutExceedsInterval { timeout: Duration, interval: Duration },

    #[error("Invalid seed currency {0:?}")]
    SeedCurrency(String),
}

/// Main service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Postgres URL. Rates are kept in memory only when unset.
    pub database_url: Option<String>,
    /// Store connection pool size.
    pub db_max_connections: u32,
    /// Upstream rate API.
    pub upstream_url: String,
    /// Interval between scheduled refresh passes.
    pub refresh_interval: Duration,
    /// Bound on one upstream call.
    pub upstream_timeout: Duration,
    /// Currencies refreshed concurrently.
    pub refresh_concurrency: usize,
    /// Currencies registered at start-up if missing.
    pub seed_currencies: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 5,
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            refresh_interval: constants::refresh_interval(),
            upstream_timeout: constants::upstream_timeout(),
            refresh_concurrency: constants::REFRESH_CONCURRENCY,
            seed_currencies: Vec::new(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = var("DATABASE_URL") {
            config.database_url = Some(url);
        }

        if let Some(url) = var("RATEKEEPER_UPSTREAM_URL") {
            config.upstream_url = url;
        }

        if let Some(secs) = var("RATEKEEPER_REFRESH_INTERVAL_SECS") {
            config.refresh_interval =
                Duration::from_secs(parse("RATEKEEPER_REFRESH_INTERVAL_SECS", &secs)?);
        }

        if let Some(secs) = var("RATEKEEPER_UPSTREAM_TIMEOUT_SECS") {
            config.upstream_timeout =
                Duration::from_secs(parse("RATEKEEPER_UPSTREAM_TIMEOUT_SECS", &secs)?);
        }

        if let Some(n) = var("RATEKEEPER_REFRESH_CONCURRENCY") {
            config.refresh_concurrency = parse("RATEKEEPER_REFRESH_CONCURRENCY", &n)?;
        }

        if let Some(n) = var("RATEKEEPER_DB_MAX_CONNECTIONS") {
            config.db_max_connections = parse("RATEKEEPER_DB_MAX_CONNECTIONS", &n)?;
        }

        if let Some(list) = var("RATEKEEPER_SEED_CURRENCIES") {
            config.seed_currencies = list
                .split(',')
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(String::from)
                .collect();
        }

        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval.is_zero() {
            return Err(ConfigError::Zero("Refresh interval"));
        }

        if self.upstream_timeout.is_zero() {
            return Err(ConfigError::Zero("Upstream timeout"));
        }

        if self.refresh_concurrency == 0 {
            return Err(ConfigError::Zero("Refresh concurrency"));
        }

        if self.db_max_connections == 0 {
            return Err(ConfigError::Zero("Database pool size"));
        }

        if !(self.upstream_url.starts_with("http://") || self.upstream_url.starts_with("https://")) {
            return Err(ConfigError::UpstreamUrl(self.upstream_url.clone()));
        }

        if self.upstream_timeout >= self.refresh_interval {
            return Err(ConfigError::TimeoutExceedsInterval {
                timeout: self.upstream_timeout,
                interval: self.refresh_interval,
            });
        }

        if let Some(bad) = self
            .seed_currencies
            .iter()
            .find(|code| CurrencyCode::parse(code).is_err())
        {
            return Err(ConfigError::SeedCurrency(bad.clone()));
        }

        Ok(())
    }

    /// Coordinator settings derived from this configuration.
    pub fn refresh_config(&self) -> RefreshConfig {
        RefreshConfig {
            upstream_timeout: self.upstream_timeout,
            refresh_concurrency: self.refresh_concurrency,
        }
    }
}

/// Log filter directive: `RUST_LOG`, else `LOG_LEVEL`, else `info`.
///
/// Read separately from [`ServiceConfig`] so logging is up before the rest
/// of the configuration is parsed.
pub fn log_directive<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    var("RUST_LOG")
        .or_else(|| var("LOG_LEVEL"))
        .unwrap_or_else(|| "info".to_string())
}

fn parse<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Unparsable {
        name,
        value: value.to_string(),
    })
}
