//! Error types for Ratekeeper domain values.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::CurrencyCode;

/// Errors raised while constructing domain values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Input is not a three-letter currency code.
    #[error("Invalid currency code: {0:?}")]
    InvalidCurrencyCode(String),

    /// A rate was zero or negative.
    #[error("Rate for {base}/{target} must be positive, got {rate}")]
    NonPositiveRate {
        base: CurrencyCode,
        target: CurrencyCode,
        rate: Decimal,
    },

    /// A snapshot row belongs to a different base currency than the table being rebuilt.
    #[error("Snapshot for base {actual} cannot be part of the {expected} rate table")]
    BaseMismatch {
        expected: CurrencyCode,
        actual: CurrencyCode,
    },
}

impl ModelError {
    /// Get error code for caller-facing messages.
    pub fn error_code(&self) -> &'static str {
        match self {
            ModelError::InvalidCurrencyCode(_) => "INVALID_CURRENCY_CODE",
            ModelError::NonPositiveRate { .. } => "INVALID_RATE",
            ModelError::BaseMismatch { .. } => "BASE_MISMATCH",
        }
    }
}

/// Result type alias for model construction.
pub type ModelResult<T> = std::result::Result<T, ModelError>;
