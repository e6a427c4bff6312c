//! Rate service error types.

use ratekeeper_common::{CurrencyCode, ModelError};
use thiserror::Error;

use crate::provider::FetchError;
use crate::store::StoreError;

/// Errors surfaced by the refresh coordinator.
#[derive(Debug, Error)]
pub enum FxError {
    /// Currency is absent from cache and store, unknown to upstream, or not
    /// a code any currency could have. Holds the normalized input.
    #[error("Currency not found: {0}")]
    CurrencyNotFound(String),

    /// Currency is already registered.
    #[error("Currency already exists: {0}")]
    CurrencyAlreadyExists(CurrencyCode),

    /// The registry is empty.
    #[error("No currencies available")]
    NoCurrencies,

    /// Upstream failed with a non-client fault, timed out, or sent garbage.
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Durable store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Anything else.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FxError {
    /// Classify an upstream failure for `code`.
    ///
    /// Client-class answers mean the code is unknown upstream; everything
    /// else is an external service fault.
    pub fn from_fetch(code: &CurrencyCode, error: FetchError) -> Self {
        if error.is_client_error() {
            FxError::CurrencyNotFound(code.to_string())
        } else {
            FxError::ExternalService(error.to_string())
        }
    }

    /// Check if this is an external-service-class failure (upstream or store).
    pub fn is_external_service_error(&self) -> bool {
        matches!(self, FxError::ExternalService(_) | FxError::Store(_))
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FxError::ExternalService(_) | FxError::Store(StoreError::Unavailable(_))
        )
    }

    /// Get error code for caller-facing responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            FxError::CurrencyNotFound(_) => "CURRENCY_NOT_FOUND",
            FxError::CurrencyAlreadyExists(_) => "CURRENCY_ALREADY_EXISTS",
            FxError::NoCurrencies => "NO_CURRENCIES",
            FxError::ExternalService(_) | FxError::Store(_) => "EXTERNAL_SERVICE_ERROR",
            FxError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to hand to callers.
    ///
    /// Upstream, store and internal failures are reduced to a generic text;
    /// their detail belongs in the logs only.
    pub fn public_message(&self) -> String {
        match self {
            FxError::ExternalService(_) | FxError::Store(_) => "External service error.".to_string(),
            FxError::Internal(_) => "An unexpected error occurred.".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<ModelError> for FxError {
    fn from(e: ModelError) -> Self {
        FxError::Internal(e.to_string())
    }
}

/// Result type for rate service operations.
pub type FxResult<T> = Result<T, FxError>;
