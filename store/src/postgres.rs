//! Postgres rate store.
//!
//! Expected schema (created by [`PgRateStore::ensure_schema`]):
//!
//! - `currencies(id UUID PK, code VARCHAR(3) UNIQUE, created_at TIMESTAMPTZ)`
//! - `exchange_rates(currency_id UUID FK, code VARCHAR(3), rate NUMERIC > 0,
//!   fetched_at TIMESTAMPTZ, PK(currency_id, code))`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ratekeeper_common::{Currency, CurrencyCode, CurrencyId, RateSnapshot};
use ratekeeper_fx::{RateStore, StoreError, StoreResult};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{PgConnection, Row};
use tracing::{debug, info, instrument};
use uuid::Uuid;

const CREATE_CURRENCIES: &str = r#"
    CREATE TABLE IF NOT EXISTS currencies (
        id UUID PRIMARY KEY,
        code VARCHAR(3) NOT NULL UNIQUE,
        created_at TIMESTAMPTZ NOT NULL
    )
"#;

const CREATE_EXCHANGE_RATES: &str = r#"
    CREATE TABLE IF NOT EXISTS exchange_rates (
        currency_id UUID NOT NULL REFERENCES currencies(id) ON DELETE CASCADE,
        code VARCHAR(3) NOT NULL,
        rate NUMERIC NOT NULL CHECK (rate > 0),
        fetched_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (currency_id, code)
    )
"#;

/// [`RateStore`] over a Postgres connection pool.
#[derive(Clone)]
pub struct PgRateStore {
    pool: PgPool,
}

impl PgRateStore {
    /// Connect a pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;

        info!(max_connections, "Connected to rate store");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the tables if they are missing.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        for ddl in [CREATE_CURRENCIES, CREATE_EXCHANGE_RATES] {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        }
        Ok(())
    }

    async fn insert_currency(conn: &mut PgConnection, code: &CurrencyCode) -> StoreResult<Currency> {
        let currency = Currency::new(code.clone());
        sqlx::query("INSERT INTO currencies (id, code, created_at) VALUES ($1, $2, $3)")
            .bind(*currency.id.as_uuid())
            .bind(currency.code.as_str())
            .bind(currency.created_at)
            .execute(&mut *conn)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(err) if err.is_unique_violation() => {
                    StoreError::Conflict(format!("currency {code} already exists"))
                }
                other => map_sqlx_error(other),
            })?;
        Ok(currency)
    }

    async fn replace_snapshots(
        conn: &mut PgConnection,
        currency: &Currency,
        snapshots: &[RateSnapshot],
    ) -> StoreResult<()> {
        if let Some(stray) = snapshots.iter().find(|s| s.base != currency.code) {
            return Err(StoreError::Corrupt(format!(
                "snapshot base {} does not match {}",
                stray.base, currency.code
            )));
        }

        sqlx::query("DELETE FROM exchange_rates WHERE currency_id = $1")
            .bind(*currency.id.as_uuid())
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;

        for snapshot in snapshots {
            sqlx::query(
                "INSERT INTO exchange_rates (currency_id, code, rate, fetched_at) VALUES ($1, $2, $3, $4)",
            )
            .bind(*currency.id.as_uuid())
            .bind(snapshot.target.as_str())
            .bind(snapshot.rate)
            .bind(snapshot.fetched_at)
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
        }
        Ok(())
    }
}

#[async_trait]
impl RateStore for PgRateStore {
    #[instrument(skip(self))]
    async fn find_currency_by_code(&self, code: &CurrencyCode) -> StoreResult<Option<Currency>> {
        sqlx::query("SELECT id, code, created_at FROM currencies WHERE code = $1")
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .map(|row| currency_from_row(&row))
            .transpose()
    }

    #[instrument(skip(self))]
    async fn save_currency(&self, code: &CurrencyCode) -> StoreResult<Currency> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        Self::insert_currency(&mut conn, code).await
    }

    #[instrument(skip(self), fields(currency = %currency.code))]
    async fn find_snapshots_by_currency(&self, currency: &Currency) -> StoreResult<Vec<RateSnapshot>> {
        let rows = sqlx::query(
            "SELECT code, rate, fetched_at FROM exchange_rates WHERE currency_id = $1 ORDER BY code",
        )
        .bind(*currency.id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| snapshot_from_row(&currency.code, row))
            .collect()
    }

    #[instrument(skip(self, snapshots), fields(currency = %currency.code, rows = snapshots.len()))]
    async fn save_snapshots(&self, currency: &Currency, snapshots: &[RateSnapshot]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Self::replace_snapshots(&mut tx, currency, snapshots).await?;
        tx.commit().await.map_err(map_sqlx_error)?;

        debug!("Snapshots replaced");
        Ok(())
    }

    async fn count_currencies(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM currencies")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        u64::try_from(count).map_err(|_| StoreError::Corrupt(format!("negative count {count}")))
    }

    async fn list_currencies(&self) -> StoreResult<Vec<Currency>> {
        let rows = sqlx::query("SELECT id, code, created_at FROM currencies ORDER BY code")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.iter().map(currency_from_row).collect()
    }

    #[instrument(skip(self, snapshots), fields(rows = snapshots.len()))]
    async fn create_currency_with_snapshots(
        &self,
        code: &CurrencyCode,
        snapshots: &[RateSnapshot],
    ) -> StoreResult<Currency> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let currency = Self::insert_currency(&mut tx, code).await?;
        Self::replace_snapshots(&mut tx, &currency, snapshots).await?;
        tx.commit().await.map_err(map_sqlx_error)?;

        debug!("Currency saved with snapshots");
        Ok(currency)
    }
}

fn currency_from_row(row: &PgRow) -> StoreResult<Currency> {
    let id: Uuid = row.try_get("id").map_err(map_sqlx_error)?;
    let code: String = row.try_get("code").map_err(map_sqlx_error)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(map_sqlx_error)?;

    Ok(Currency {
        id: CurrencyId::from_uuid(id),
        code: parse_code(&code)?,
        created_at,
    })
}

fn snapshot_from_row(base: &CurrencyCode, row: &PgRow) -> StoreResult<RateSnapshot> {
    let target: String = row.try_get("code").map_err(map_sqlx_error)?;
    let rate: Decimal = row.try_get("rate").map_err(map_sqlx_error)?;
    let fetched_at: DateTime<Utc> = row.try_get("fetched_at").map_err(map_sqlx_error)?;

    Ok(RateSnapshot {
        base: base.clone(),
        target: parse_code(&target)?,
        rate,
        fetched_at,
    })
}

fn parse_code(raw: &str) -> StoreResult<CurrencyCode> {
    CurrencyCode::parse(raw).map_err(|e| StoreError::Corrupt(e.to_string()))
}

/// Map a driver error onto the store taxonomy.
fn map_sqlx_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => {
            StoreError::Conflict(err.message().to_string())
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => StoreError::Corrupt(e.to_string()),
        other => StoreError::Unavailable(other.to_string()),
    }
}
