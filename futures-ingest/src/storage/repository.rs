//! PostgreSQL OHLCV repository
//!
//! Writes go through multi-row `INSERT ... ON CONFLICT (time, symbol) DO UPDATE`
//! statements, all inside one transaction per `upsert` call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{is_identifier, DatabaseSettings, StorageSettings};
use crate::schema::{BarSchema, CanonicalRecord};

use super::timescale::TimescaleOperations;
use super::{
    dedupe_by_key, stored_volume, OhlcvStore, RepositoryError, RepositoryResult, SymbolStats,
};

/// Bound parameters per row
const PARAMS_PER_ROW: usize = 7;

/// Postgres limit on bind parameters in one statement
const MAX_BIND_PARAMS: usize = u16::MAX as usize;

/// OHLCV store backed by a PostgreSQL (optionally TimescaleDB) pool
pub struct PgOhlcvStore {
    pool: PgPool,
    namespace: String,
    batch_size: usize,
    create_hypertable: bool,
}

impl PgOhlcvStore {
    /// Create a new store over an existing pool
    pub fn new(pool: PgPool, storage: &StorageSettings) -> RepositoryResult<Self> {
        if !is_identifier(&storage.namespace) {
            return Err(RepositoryError::Configuration(format!(
                "invalid namespace '{}'",
                storage.namespace
            )));
        }
        if storage.batch_insert_size == 0 {
            return Err(RepositoryError::Configuration(
                "batch_insert_size must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            pool,
            namespace: storage.namespace.clone(),
            batch_size: storage.batch_insert_size.min(MAX_BIND_PARAMS / PARAMS_PER_ROW),
            create_hypertable: storage.create_hypertable,
        })
    }

    /// Connect a pool and create the store from settings
    pub async fn from_settings(
        database: &DatabaseSettings,
        storage: &StorageSettings,
    ) -> RepositoryResult<Self> {
        let options = connect_options(database)?;

        let pool = PgPoolOptions::new()
            .max_connections(database.max_connections)
            .min_connections(database.min_connections)
            .acquire_timeout(Duration::from_secs(database.acquire_timeout_secs))
            .connect_with(options)
            .await?;

        info!(
            "Connected to PostgreSQL (max_connections={})",
            database.max_connections
        );
        Self::new(pool, storage)
    }

    /// Get the database pool reference
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Fully qualified table name for a schema
    pub fn table(&self, schema: BarSchema) -> String {
        format!("{}.{}", self.namespace, schema.table_name())
    }

    /// Effective rows per INSERT statement
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Insert one chunk within the caller's transaction
    async fn upsert_chunk(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        records: &[CanonicalRecord],
    ) -> RepositoryResult<u64> {
        let volumes = records
            .iter()
            .map(stored_volume)
            .collect::<RepositoryResult<Vec<i32>>>()?;

        let query = upsert_sql(table, records.len());
        let mut sqlx_query = sqlx::query(&query);

        for (record, volume) in records.iter().zip(volumes) {
            sqlx_query = sqlx_query
                .bind(record.time)
                .bind(&record.symbol)
                .bind(record.open)
                .bind(record.high)
                .bind(record.low)
                .bind(record.close)
                .bind(volume);
        }

        let result = sqlx_query.execute(&mut **tx).await?;
        Ok(result.rows_affected())
    }
}

/// Connection options from `database.url`, or from the individual fields when no URL
/// is set. Field values go to the driver unencoded.
pub fn connect_options(database: &DatabaseSettings) -> RepositoryResult<PgConnectOptions> {
    if !database.url.is_empty() {
        return database
            .url
            .parse::<PgConnectOptions>()
            .map_err(|e| RepositoryError::Configuration(format!("invalid database URL: {}", e)));
    }

    let Some(host) = &database.host else {
        return Err(RepositoryError::Configuration(
            "database not configured (set database.url, DATABASE_URL or DB_HOST)".to_string(),
        ));
    };

    let mut options = PgConnectOptions::new()
        .host(host)
        .port(database.port.unwrap_or(5432))
        .database(database.name.as_deref().unwrap_or("postgres"));
    if let Some(user) = &database.user {
        options = options.username(user);
    }
    if let Some(password) = &database.password {
        options = options.password(password);
    }
    Ok(options)
}

/// Deduplicate and order a batch by `(time, symbol)`. Concurrent transactions then lock
/// conflicting rows in the same order.
fn prepare_batch(records: &[CanonicalRecord]) -> Vec<CanonicalRecord> {
    let mut records = dedupe_by_key(records);
    records.sort_by(|a, b| a.key().cmp(&b.key()));
    records
}

/// Build a multi-row upsert for `rows` records
fn upsert_sql(table: &str, rows: usize) -> String {
    let mut query = format!(
        "INSERT INTO {} (time, symbol, open, high, low, close, volume) VALUES ",
        table
    );

    let mut param_count = 1;
    for i in 0..rows {
        if i > 0 {
            query.push_str(", ");
        }

        query.push_str(&format!(
            "(${}, ${}, ${}, ${}, ${}, ${}, ${})",
            param_count,
            param_count + 1,
            param_count + 2,
            param_count + 3,
            param_count + 4,
            param_count + 5,
            param_count + 6,
        ));
        param_count += PARAMS_PER_ROW;
    }

    query.push_str(
        " ON CONFLICT (time, symbol) DO UPDATE SET \
         open = EXCLUDED.open, \
         high = EXCLUDED.high, \
         low = EXCLUDED.low, \
         close = EXCLUDED.close, \
         volume = EXCLUDED.volume",
    );
    query
}

fn record_from_row(row: &PgRow) -> RepositoryResult<CanonicalRecord> {
    Ok(CanonicalRecord {
        time: row.try_get("time")?,
        symbol: row.try_get("symbol")?,
        open: row.try_get("open")?,
        high: row.try_get("high")?,
        low: row.try_get("low")?,
        close: row.try_get("close")?,
        volume: i64::from(row.try_get::<i32, _>("volume")?),
    })
}

#[async_trait]
impl OhlcvStore for PgOhlcvStore {
    async fn ensure_schema(&self, schema: BarSchema) -> RepositoryResult<()> {
        TimescaleOperations::new(self.pool.clone(), &self.namespace)
            .ensure_schema(schema, self.create_hypertable)
            .await
    }

    async fn upsert(
        &self,
        schema: BarSchema,
        records: &[CanonicalRecord],
    ) -> RepositoryResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let records = prepare_batch(records);
        let table = self.table(schema);

        // Rolls back on drop unless committed
        let mut tx = self.pool.begin().await?;
        let mut total_affected = 0;

        for chunk in records.chunks(self.batch_size) {
            total_affected += self.upsert_chunk(&mut tx, &table, chunk).await?;
        }

        tx.commit().await?;

        debug!("Upserted {} rows into {}", total_affected, table);
        Ok(total_affected)
    }

    async fn fetch_range(
        &self,
        schema: BarSchema,
        symbols: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepositoryResult<Vec<CanonicalRecord>> {
        let table = self.table(schema);

        let rows = if symbols.is_empty() {
            sqlx::query(&format!(
                r#"
                SELECT time, symbol, open, high, low, close, volume
                FROM {}
                WHERE time >= $1 AND time < $2
                ORDER BY time ASC, symbol ASC
                "#,
                table
            ))
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                r#"
                SELECT time, symbol, open, high, low, close, volume
                FROM {}
                WHERE time >= $1 AND time < $2 AND symbol = ANY($3)
                ORDER BY time ASC, symbol ASC
                "#,
                table
            ))
            .bind(start)
            .bind(end)
            .bind(symbols)
            .fetch_all(&self.pool)
            .await?
        };

        rows.iter().map(record_from_row).collect()
    }

    async fn stats(&self, schema: BarSchema) -> RepositoryResult<Vec<SymbolStats>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT
                symbol,
                COUNT(*) AS total_records,
                MIN(time) AS earliest_time,
                MAX(time) AS latest_time
            FROM {}
            GROUP BY symbol
            ORDER BY symbol
            "#,
            self.table(schema)
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(SymbolStats {
                    symbol: row.try_get("symbol")?,
                    total_records: row.try_get::<i64, _>("total_records")? as u64,
                    earliest_time: row.try_get("earliest_time")?,
                    latest_time: row.try_get("latest_time")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    #[test]
    fn test_upsert_sql_placeholders() {
        let sql = upsert_sql("futures_data.ohlcv_1d", 2);
        assert!(sql.starts_with("INSERT INTO futures_data.ohlcv_1d (time, symbol"));
        assert!(sql.contains("($1, $2, $3, $4, $5, $6, $7), ($8, $9, $10, $11, $12, $13, $14)"));
        assert!(!sql.contains("$15"));
        assert!(sql.contains("ON CONFLICT (time, symbol) DO UPDATE SET"));
        assert!(sql.contains("volume = EXCLUDED.volume"));
    }

    fn lazy_pool() -> PgPool {
        PgPoolOptions::new()
            .connect_lazy("postgres://ingest@localhost/futures")
            .unwrap()
    }

    fn storage(namespace: &str, batch_insert_size: usize) -> StorageSettings {
        StorageSettings {
            namespace: namespace.to_string(),
            batch_insert_size,
            create_hypertable: false,
        }
    }

    fn record(day: u32, symbol: &str, close: f64) -> CanonicalRecord {
        CanonicalRecord {
            time: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            symbol: symbol.to_string(),
            open: 4700.0,
            high: 4710.0,
            low: 4690.0,
            close,
            volume: 1000,
        }
    }

    #[tokio::test]
    async fn test_batch_size_clamped_to_bind_limit() {
        let store = PgOhlcvStore::new(lazy_pool(), &storage("futures_data", 100_000)).unwrap();
        assert_eq!(store.batch_size(), 65_535 / 7);
        assert!(store.batch_size() * PARAMS_PER_ROW <= u16::MAX as usize);

        let store = PgOhlcvStore::new(lazy_pool(), &storage("futures_data", 500)).unwrap();
        assert_eq!(store.batch_size(), 500);
        assert_eq!(store.table(BarSchema::Ohlcv1d), "futures_data.ohlcv_1d");
    }

    #[tokio::test]
    async fn test_new_rejects_bad_storage_settings() {
        let result = PgOhlcvStore::new(lazy_pool(), &storage("futures-data; drop", 1000));
        assert!(matches!(result, Err(RepositoryError::Configuration(_))));

        let result = PgOhlcvStore::new(lazy_pool(), &storage("futures_data", 0));
        assert!(matches!(result, Err(RepositoryError::Configuration(_))));
    }

    #[test]
    fn test_connect_options_keep_special_characters() {
        let database = DatabaseSettings {
            host: Some("db.internal".to_string()),
            port: Some(5433),
            name: Some("market".to_string()),
            user: Some("ingest".to_string()),
            password: Some("p#ss/w?rd".to_string()),
            ..DatabaseSettings::default()
        };

        let options = connect_options(&database).unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_username(), "ingest");
        assert_eq!(options.get_database(), Some("market"));
    }

    #[test]
    fn test_connect_options_prefers_url() {
        let database = DatabaseSettings {
            url: "postgres://reader@warehouse:6543/bars".to_string(),
            host: Some("ignored".to_string()),
            ..DatabaseSettings::default()
        };

        let options = connect_options(&database).unwrap();
        assert_eq!(options.get_host(), "warehouse");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("bars"));
    }

    #[test]
    fn test_connect_options_requires_host_or_url() {
        let result = connect_options(&DatabaseSettings::default());
        assert!(matches!(result, Err(RepositoryError::Configuration(_))));
    }

    #[test]
    fn test_prepare_batch_orders_by_key() {
        let batch = vec![
            record(3, "ES.c.0", 4701.0),
            record(2, "NQ.c.0", 16800.0),
            record(2, "ES.c.0", 4700.0),
            record(3, "ES.c.0", 4702.5),
        ];

        let prepared = prepare_batch(&batch);
        let keys: Vec<(u32, &str)> = prepared
            .iter()
            .map(|r| (r.time.day(), r.symbol.as_str()))
            .collect();
        assert_eq!(keys, vec![(2, "ES.c.0"), (2, "NQ.c.0"), (3, "ES.c.0")]);
        assert_eq!(prepared[2].close, 4702.5);
    }
}
