//! Loader: persists observations into the Postgres warehouse
//!
//! Schema creation is idempotent and declares the natural-key uniqueness
//! constraint, so the database itself rejects duplicates even if the
//! application-level dedup is bypassed. Each dataset's load runs in one
//! transaction: a failure partway rolls back to the pre-load state.
//!
//! Append-mode collision policy: skip (`ON CONFLICT DO NOTHING`), never
//! upsert, so existing rows are never rewritten by an incremental run.

use std::time::Duration;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::error::LoadError;
use crate::model::Observation;

/// Postgres caps bind parameters at 65535 per statement; 11 columns per row
/// keeps this batch size comfortably under it.
const INSERT_BATCH_SIZE: usize = 1000;

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS observations (
    id BIGSERIAL PRIMARY KEY,
    country_code TEXT NOT NULL,
    country_name TEXT,
    indicator_code TEXT NOT NULL,
    indicator_label TEXT,
    unit TEXT,
    unit_label TEXT,
    year DATE NOT NULL,
    value DOUBLE PRECISION,
    source_dataset TEXT NOT NULL,
    loaded_at TIMESTAMPTZ NOT NULL,
    CONSTRAINT observations_natural_key
        UNIQUE (country_code, indicator_code, year, source_dataset)
)
"#;

/// Warehouse write mode. A closed enumeration so invalid modes are rejected
/// at configuration time, not at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadMode {
    /// Drop the table if present, recreate the schema, insert everything.
    FullRefresh,
    /// Keep the schema, delete all existing rows, insert everything.
    Truncate,
    /// Keep schema and rows, insert only records with new natural keys.
    Append,
}

impl std::fmt::Display for LoadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadMode::FullRefresh => write!(f, "full-refresh"),
            LoadMode::Truncate => write!(f, "truncate"),
            LoadMode::Append => write!(f, "append"),
        }
    }
}

/// Outcome of one dataset's load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub inserted: u64,
    /// Rows skipped on key collision (append mode only).
    pub skipped: u64,
}

/// Seam between the orchestrator and the warehouse, so orchestration logic
/// is testable against an in-memory store.
#[async_trait]
pub trait ObservationStore: Send + Sync {
    /// One-time per-run table preparation for the given mode.
    async fn prepare(&self, mode: LoadMode) -> Result<(), LoadError>;

    /// Write one dataset's rows as a single all-or-nothing unit.
    async fn load(
        &self,
        dataset: &str,
        mode: LoadMode,
        rows: &[Observation],
    ) -> Result<LoadStats, LoadError>;
}

#[async_trait]
impl<T: ObservationStore + ?Sized> ObservationStore for std::sync::Arc<T> {
    async fn prepare(&self, mode: LoadMode) -> Result<(), LoadError> {
        (**self).prepare(mode).await
    }

    async fn load(
        &self,
        dataset: &str,
        mode: LoadMode,
        rows: &[Observation],
    ) -> Result<LoadStats, LoadError> {
        (**self).load(dataset, mode, rows).await
    }
}

/// Postgres-backed observation store. Owns the run's only connection pool;
/// dropping the loader releases it on every exit path.
pub struct Loader {
    pool: PgPool,
}

impl Loader {
    /// Connect to the warehouse, waiting for it to come up: the initial
    /// connection is retried a bounded number of times with a fixed delay
    /// so a database container that is still starting does not fail the run.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, LoadError> {
        let url = config.url();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match Self::connect_url_with_timeout(&url, config.connect_timeout_secs).await {
                Ok(loader) => {
                    info!(host = %config.host, db = %config.name, "Warehouse connection established");
                    return Ok(loader);
                },
                Err(err) if attempt < config.connect_attempts => {
                    warn!(
                        attempt,
                        max_attempts = config.connect_attempts,
                        error = %err,
                        "Warehouse not ready, waiting"
                    );
                    tokio::time::sleep(Duration::from_secs(config.connect_retry_delay_secs)).await;
                },
                Err(err) => return Err(err),
            }
        }
    }

    /// Connect directly to a connection URL. Used by integration tests
    /// against a disposable database.
    pub async fn connect_url(url: &str) -> Result<Self, LoadError> {
        Self::connect_url_with_timeout(url, 10).await
    }

    async fn connect_url_with_timeout(url: &str, timeout_secs: u64) -> Result<Self, LoadError> {
        // Single writer by design: one run at a time owns the table, so a
        // tiny pool is enough.
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(timeout_secs))
            .connect(url)
            .await
            .map_err(LoadError::Connect)?;

        Ok(Self { pool })
    }

    /// The run's shared connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ObservationStore for Loader {
    async fn prepare(&self, mode: LoadMode) -> Result<(), LoadError> {
        let prepare_err = |source| LoadError::Prepare { mode, source };

        let mut tx = self.pool.begin().await.map_err(prepare_err)?;

        match mode {
            LoadMode::FullRefresh => {
                sqlx::query("DROP TABLE IF EXISTS observations")
                    .execute(&mut *tx)
                    .await
                    .map_err(prepare_err)?;
                sqlx::query(CREATE_TABLE_SQL)
                    .execute(&mut *tx)
                    .await
                    .map_err(prepare_err)?;
                info!("Dropped and recreated observations table");
            },
            LoadMode::Truncate => {
                sqlx::query(CREATE_TABLE_SQL)
                    .execute(&mut *tx)
                    .await
                    .map_err(prepare_err)?;
                sqlx::query("TRUNCATE TABLE observations")
                    .execute(&mut *tx)
                    .await
                    .map_err(prepare_err)?;
                info!("Truncated observations table");
            },
            LoadMode::Append => {
                sqlx::query(CREATE_TABLE_SQL)
                    .execute(&mut *tx)
                    .await
                    .map_err(prepare_err)?;
                info!("Ensured observations table exists");
            },
        }

        tx.commit().await.map_err(prepare_err)
    }

    async fn load(
        &self,
        dataset: &str,
        mode: LoadMode,
        rows: &[Observation],
    ) -> Result<LoadStats, LoadError> {
        if rows.is_empty() {
            info!(dataset = %dataset, "No rows to load");
            return Ok(LoadStats::default());
        }

        let write_err = |source| LoadError::Write {
            dataset: dataset.to_string(),
            mode,
            source,
        };

        let mut tx = self.pool.begin().await.map_err(write_err)?;
        let mut inserted: u64 = 0;

        for chunk in rows.chunks(INSERT_BATCH_SIZE) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO observations (country_code, country_name, indicator_code, \
                 indicator_label, unit, unit_label, year, value, source_dataset, loaded_at) ",
            );

            builder.push_values(chunk, |mut b, row| {
                b.push_bind(&row.country_code)
                    .push_bind(&row.country_name)
                    .push_bind(&row.indicator_code)
                    .push_bind(&row.indicator_label)
                    .push_bind(row.unit.as_deref())
                    .push_bind(row.unit_label.as_deref())
                    .push_bind(row.year)
                    .push_bind(row.value)
                    .push_bind(&row.source_dataset)
                    .push_bind(row.loaded_at);
            });

            if mode == LoadMode::Append {
                builder.push(" ON CONFLICT ON CONSTRAINT observations_natural_key DO NOTHING");
            }

            let result = builder.build().execute(&mut *tx).await.map_err(write_err)?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(write_err)?;

        let skipped = rows.len() as u64 - inserted;
        info!(
            dataset = %dataset,
            mode = %mode,
            inserted,
            skipped,
            "Loaded dataset into observations table"
        );

        Ok(LoadStats { inserted, skipped })
    }
}
