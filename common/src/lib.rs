//! Ratekeeper Common Types
//!
//! Domain types shared by the Ratekeeper crates: canonical currency codes,
//! registered currencies, rate tables and their persisted snapshot rows.

pub mod currency;
pub mod error;
pub mod identifiers;
pub mod rates;
pub mod time;

pub use currency::*;
pub use error::*;
pub use identifiers::*;
pub use rates::*;
pub use time::*;
