//! Currency codes and registered currencies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ModelError, ModelResult};
use crate::identifiers::CurrencyId;
use crate::time::{now, Timestamp};

/// Canonical ISO 4217 style currency code.
///
/// Always three uppercase ASCII letters. Parsing trims surrounding whitespace
/// and uppercases, so `"usd"`, `" Usd "` and `"USD"` are the same code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Normalize and validate a raw code.
    pub fn parse(raw: &str) -> ModelResult<Self> {
        let normalized = Self::normalize(raw);
        if normalized.len() != 3 || !normalized.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ModelError::InvalidCurrencyCode(raw.to_string()));
        }
        Ok(Self(normalized))
    }

    /// Trimmed, uppercased form of `raw`, valid or not.
    pub fn normalize(raw: &str) -> String {
        raw.trim().to_ascii_uppercase()
    }

    /// Get the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CurrencyCode {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

impl AsRef<str> for CurrencyCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A currency tracked by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    /// Store-assigned identifier.
    pub id: CurrencyId,
    /// Canonical code, unique across the registry.
    pub code: CurrencyCode,
    /// When the currency was registered.
    pub created_at: Timestamp,
}

impl Currency {
    /// Create a new, not yet persisted, currency.
    pub fn new(code: CurrencyCode) -> Self {
        Self {
            id: CurrencyId::new(),
            code,
            created_at: now(),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_normalizes_case_and_whitespace() {
        assert_eq!(CurrencyCode::parse("usd").unwrap().as_str(), "USD");
        assert_eq!(CurrencyCode::parse(" eUr ").unwrap().as_str(), "EUR");
        assert_eq!(
            CurrencyCode::parse("gbp").unwrap(),
            CurrencyCode::parse("GBP").unwrap()
        );
    }

    #[test]
    fn test_parse_rejects_malformed_codes() {
        for raw in ["", "US", "USDT", "U$D", "12A", "   "] {
            assert!(
                matches!(CurrencyCode::parse(raw), Err(ModelError::InvalidCurrencyCode(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_normalize_keeps_malformed_input() {
        assert_eq!(CurrencyCode::normalize(" usdt "), "USDT");
        assert_eq!(CurrencyCode::normalize("eur"), "EUR");
    }

    #[test]
    fn test_serde_uses_plain_string() {
        let code = CurrencyCode::parse("chf").unwrap();
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, "\"CHF\"");

        let back: CurrencyCode = serde_json::from_str("\"jpy\"").unwrap();
        assert_eq!(back.as_str(), "JPY");

        assert!(serde_json::from_str::<CurrencyCode>("\"nope\"").is_err());
    }

    proptest! {
        #[test]
        fn prop_case_insensitive(code in "[a-zA-Z]{3}") {
            let lower = CurrencyCode::parse(&code.to_lowercase()).unwrap();
            let upper = CurrencyCode::parse(&code.to_uppercase()).unwrap();
            prop_assert_eq!(&lower, &upper);
            prop_assert_eq!(lower.as_str(), code.to_uppercase());
        }
    }
}
