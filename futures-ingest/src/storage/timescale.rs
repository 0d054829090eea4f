//! Schema bootstrap
//!
//! Creates the namespace and per-schema OHLCV table, and optionally converts the table
//! to a TimescaleDB hypertable.

use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::schema::BarSchema;

use super::RepositoryResult;

/// Schema and TimescaleDB operations for one namespace
pub struct TimescaleOperations {
    pool: PgPool,
    namespace: String,
}

impl TimescaleOperations {
    pub fn new(pool: PgPool, namespace: &str) -> Self {
        Self {
            pool,
            namespace: namespace.to_string(),
        }
    }

    /// Create the namespace, table and index if they do not exist.
    pub async fn ensure_schema(
        &self,
        schema: BarSchema,
        create_hypertable: bool,
    ) -> RepositoryResult<()> {
        info!("Ensuring {}.{} exists", self.namespace, schema.table_name());

        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.namespace))
            .execute(&self.pool)
            .await?;

        sqlx::query(&table_ddl(&self.namespace, schema))
            .execute(&self.pool)
            .await?;

        sqlx::query(&index_ddl(&self.namespace, schema))
            .execute(&self.pool)
            .await?;

        if create_hypertable {
            self.create_hypertable(schema).await;
        }

        info!("Schema ready");
        Ok(())
    }

    /// Convert the table to a hypertable. A missing extension is logged, not fatal.
    async fn create_hypertable(&self, schema: BarSchema) {
        let table = format!("{}.{}", self.namespace, schema.table_name());

        if let Err(e) = sqlx::query("CREATE EXTENSION IF NOT EXISTS timescaledb CASCADE")
            .execute(&self.pool)
            .await
        {
            warn!("TimescaleDB extension unavailable, keeping plain table: {}", e);
            return;
        }

        let result = sqlx::query(
            r#"
            SELECT create_hypertable(
                $1::regclass,
                'time',
                chunk_time_interval => INTERVAL '30 days',
                if_not_exists => TRUE
            )
            "#,
        )
        .bind(&table)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => info!("Created {} hypertable", table),
            Err(e) => {
                if e.to_string().contains("already a hypertable") {
                    debug!("{} is already a hypertable", table);
                } else {
                    warn!("Failed to create hypertable: {}", e);
                }
            }
        }
    }
}

/// `CREATE TABLE` statement for a schema's table
pub fn table_ddl(namespace: &str, schema: BarSchema) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.{} (
            time TIMESTAMPTZ NOT NULL,
            symbol TEXT NOT NULL,
            open DOUBLE PRECISION NOT NULL,
            high DOUBLE PRECISION NOT NULL,
            low DOUBLE PRECISION NOT NULL,
            close DOUBLE PRECISION NOT NULL,
            volume INTEGER NOT NULL,
            PRIMARY KEY (time, symbol)
        )
        "#,
        namespace,
        schema.table_name()
    )
}

fn index_ddl(namespace: &str, schema: BarSchema) -> String {
    let table = schema.table_name();
    format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_symbol_time \
         ON {namespace}.{table} (symbol, time DESC)"
    )
}
