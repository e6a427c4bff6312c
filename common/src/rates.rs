//! Rate tables, persisted snapshot rows and the caller-facing rate DTO.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::currency::CurrencyCode;
use crate::error::{ModelError, ModelResult};
use crate::time::{now, Timestamp};

/// The full set of target rates for one base currency.
///
/// Every rate is strictly positive. A table is always replaced as a whole;
/// there is no API for patching individual targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateTable {
    /// Base currency the rates are quoted from.
    pub base: CurrencyCode,
    /// Target code to rate (1 base = rate target).
    rates: BTreeMap<CurrencyCode, Decimal>,
    /// When the rates were fetched from upstream.
    pub fetched_at: Timestamp,
}

impl RateTable {
    /// Build a table, rejecting non-positive rates.
    pub fn new(
        base: CurrencyCode,
        rates: impl IntoIterator<Item = (CurrencyCode, Decimal)>,
        fetched_at: Timestamp,
    ) -> ModelResult<Self> {
        let mut table = BTreeMap::new();
        for (target, rate) in rates {
            if rate <= Decimal::ZERO {
                return Err(ModelError::NonPositiveRate {
                    base: base.clone(),
                    target,
                    rate,
                });
            }
            table.insert(target, rate);
        }

        Ok(Self {
            base,
            rates: table,
            fetched_at,
        })
    }

    /// Build a table stamped with the current time.
    pub fn fetched_now(
        base: CurrencyCode,
        rates: impl IntoIterator<Item = (CurrencyCode, Decimal)>,
    ) -> ModelResult<Self> {
        Self::new(base, rates, now())
    }

    /// Rebuild a table from the snapshot rows of one base currency.
    ///
    /// The table's `fetched_at` is the newest snapshot timestamp, or now if
    /// there are no rows.
    pub fn from_snapshots(base: CurrencyCode, snapshots: &[RateSnapshot]) -> ModelResult<Self> {
        if let Some(stray) = snapshots.iter().find(|s| s.base != base) {
            return Err(ModelError::BaseMismatch {
                expected: base,
                actual: stray.base.clone(),
            });
        }

        let fetched_at = snapshots
            .iter()
            .map(|s| s.fetched_at)
            .max()
            .unwrap_or_else(now);

        Self::new(
            base,
            snapshots.iter().map(|s| (s.target.clone(), s.rate)),
            fetched_at,
        )
    }

    /// Explode the table into one snapshot row per target.
    pub fn to_snapshots(&self) -> Vec<RateSnapshot> {
        self.rates
            .iter()
            .map(|(target, rate)| RateSnapshot {
                base: self.base.clone(),
                target: target.clone(),
                rate: *rate,
                fetched_at: self.fetched_at,
            })
            .collect()
    }

    /// Map the table to caller DTOs, ordered by target code.
    pub fn to_exchange_rates(&self) -> Vec<ExchangeRate> {
        self.rates
            .iter()
            .map(|(target, rate)| ExchangeRate {
                base_code: self.base.clone(),
                target_code: target.clone(),
                rate: *rate,
            })
            .collect()
    }

    /// Rate for a single target.
    pub fn rate(&self, target: &CurrencyCode) -> Option<Decimal> {
        self.rates.get(target).copied()
    }

    /// All target rates.
    pub fn rates(&self) -> &BTreeMap<CurrencyCode, Decimal> {
        &self.rates
    }

    /// Number of targets.
    pub fn len(&self) -> usize {
        self.rates.len()
    }

    /// Check if the table has no targets.
    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

/// Tables are equal when they quote the same rates for the same base.
/// `fetched_at` is metadata and not part of equality.
impl PartialEq for RateTable {
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base && self.rates == other.rates
    }
}

impl Eq for RateTable {}

/// One persisted (base, target) rate row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub base: CurrencyCode,
    pub target: CurrencyCode,
    pub rate: Decimal,
    pub fetched_at: Timestamp,
}

/// A single rate as handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRate {
    #[serde(rename = "baseCurrencyCode")]
    pub base_code: CurrencyCode,
    #[serde(rename = "currencyCode")]
    pub target_code: CurrencyCode,
    pub rate: Decimal,
}

impl fmt::Display for ExchangeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.base_code, self.target_code, self.rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn code(s: &str) -> CurrencyCode {
        CurrencyCode::parse(s).unwrap()
    }

    fn eur_table() -> RateTable {
        RateTable::fetched_now(
            code("EUR"),
            vec![(code("USD"), dec!(1.08)), (code("GBP"), dec!(0.86))],
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_non_positive_rate() {
        let err = RateTable::fetched_now(code("EUR"), vec![(code("USD"), dec!(0))]).unwrap_err();
        assert!(matches!(err, ModelError::NonPositiveRate { .. }));

        let err = RateTable::fetched_now(code("EUR"), vec![(code("USD"), dec!(-1.5))]).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_RATE");
    }

    #[test]
    fn test_exchange_rates_are_ordered_by_target() {
        let rates = eur_table().to_exchange_rates();

        assert_eq!(rates.len(), 2);
        assert_eq!(rates[0].target_code, code("GBP"));
        assert_eq!(rates[0].rate, dec!(0.86));
        assert_eq!(rates[1].target_code, code("USD"));
        assert!(rates.iter().all(|r| r.base_code == code("EUR")));
    }

    #[test]
    fn test_rebuild_from_snapshots() {
        let table = eur_table();
        let rebuilt = RateTable::from_snapshots(code("EUR"), &table.to_snapshots()).unwrap();

        assert_eq!(rebuilt, table);
        assert_eq!(rebuilt.fetched_at, table.fetched_at);
    }

    #[test]
    fn test_rebuild_rejects_foreign_snapshot() {
        let snapshots = eur_table().to_snapshots();
        let err = RateTable::from_snapshots(code("USD"), &snapshots).unwrap_err();
        assert!(matches!(err, ModelError::BaseMismatch { .. }));
    }

    #[test]
    fn test_rebuild_from_no_rows_is_empty() {
        let table = RateTable::from_snapshots(code("EUR"), &[]).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_exchange_rate_wire_names() {
        let rate = &eur_table().to_exchange_rates()[1];
        let json = serde_json::to_value(rate).unwrap();

        assert_eq!(json["baseCurrencyCode"], "EUR");
        assert_eq!(json["currencyCode"], "USD");
        assert_eq!(json["rate"], "1.08");
    }
}
