//! Ratekeeper Store
//!
//! Durable [`RateStore`](ratekeeper_fx::RateStore) implementations. Currency
//! uniqueness is enforced by the database, and every multi-row write runs in
//! a single transaction.

pub mod postgres;

pub use postgres::PgRateStore;
