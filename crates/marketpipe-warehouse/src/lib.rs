//! # Marketpipe Warehouse
//!
//! DuckDB-based storage for the append-only price series collected by
//! marketpipe.
//!
//! ## Overview
//!
//! - **Append-only**: rows in `price_points` are inserted, never updated or deleted
//! - **Parameterized SQL**: every user-derived value is bound as a parameter
//! - **Connection pooling**: connections are cloned from one database instance
//! - **Exact timestamps**: observation instants are stored as integer nanoseconds
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use marketpipe_warehouse::{PriceRecord, Warehouse, WarehouseConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open(WarehouseConfig::default())?;
//!
//!     warehouse.append_price(&PriceRecord {
//!         symbol: "BTC".to_string(),
//!         price: 50_000.0,
//!         observed_at_ns: 1_700_000_000_000_000_000,
//!         trace_id: None,
//!     })?;
//!
//!     let latest = warehouse.latest_prices("BTC", 2)?;
//!     println!("{} points", latest.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `price_points` | Append-only price observations per symbol |
//! | `schema_migrations` | Applied migration versions |

pub mod duckdb;
pub mod migrations;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

pub use duckdb::{DuckDbConnectionManager, PooledConnection};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A record was rejected before reaching the database.
    #[error("record rejected: {0}")]
    RecordRejected(String),
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for marketpipe data.
    pub marketpipe_home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        let marketpipe_home = resolve_marketpipe_home();
        let db_path = env::var_os("MARKETPIPE_DB_PATH")
            .map(PathBuf::from)
            .filter(|path| !path.as_os_str().is_empty())
            .unwrap_or_else(|| marketpipe_home.join("data").join("prices.duckdb"));
        Self {
            marketpipe_home,
            db_path,
            max_pool_size: 4,
        }
    }
}

impl WarehouseConfig {
    /// Configuration rooted at `home`, ignoring environment overrides.
    pub fn in_dir(home: impl Into<PathBuf>) -> Self {
        let marketpipe_home = home.into();
        let db_path = marketpipe_home.join("data").join("prices.duckdb");
        Self {
            marketpipe_home,
            db_path,
            max_pool_size: 4,
        }
    }
}

/// A single price observation as stored in `price_points`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceRecord {
    /// Canonical symbol (e.g., "BTC").
    pub symbol: String,
    /// Observed price, strictly positive.
    pub price: f64,
    /// Observation instant as nanoseconds since the Unix epoch (UTC).
    pub observed_at_ns: i64,
    /// Correlation id of the request that collected the point.
    pub trace_id: Option<String>,
}

/// The main warehouse interface for price storage.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    /// Open a warehouse with the specified configuration, creating the
    /// database file and applying migrations as needed.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::open(config.db_path.clone(), config.max_pool_size)?;
        let warehouse = Self { config, manager };
        warehouse.initialize()?;
        tracing::debug!(db_path = %warehouse.db_path().display(), "warehouse opened");
        Ok(warehouse)
    }

    /// Initialize database schema.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    /// Get the path to the database file.
    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    /// Append one price observation inside its own transaction.
    ///
    /// # Security
    /// Uses parameterized queries; no record field is interpolated into SQL.
    pub fn append_price(&self, record: &PriceRecord) -> Result<(), WarehouseError> {
        if !record.price.is_finite() || record.price <= 0.0 {
            return Err(WarehouseError::RecordRejected(format!(
                "price for {} must be positive and finite, got {}",
                record.symbol, record.price
            )));
        }

        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), WarehouseError> {
            let rows_affected = connection.execute(
                "INSERT INTO price_points (symbol, price, observed_at_ns, trace_id) \
                 VALUES (?, ?, ?, ?)",
                ::duckdb::params![
                    record.symbol.as_str(),
                    record.price,
                    record.observed_at_ns,
                    record.trace_id.as_deref(),
                ],
            )?;
            tracing::trace!(symbol = %record.symbol, rows_affected, "price point inserted");
            Ok(())
        })();

        finalize_transaction(connection, result)
    }

    /// Most recent observations for `symbol`, newest first, at most `limit` rows.
    ///
    /// Ties on the observation instant are broken by insertion order.
    pub fn latest_prices(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<PriceRecord>, WarehouseError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(
            "SELECT symbol, price, observed_at_ns, trace_id FROM price_points \
             WHERE symbol = ? ORDER BY observed_at_ns DESC, id DESC LIMIT ?",
        )?;
        let rows = statement.query_map(::duckdb::params![symbol, limit], |row| {
            Ok(PriceRecord {
                symbol: row.get(0)?,
                price: row.get(1)?,
                observed_at_ns: row.get(2)?,
                trace_id: row.get(3)?,
            })
        })?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Number of stored observations for `symbol`.
    pub fn count_prices(&self, symbol: &str) -> Result<u64, WarehouseError> {
        let connection = self.manager.acquire()?;
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM price_points WHERE symbol = ?",
            ::duckdb::params![symbol],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

/// Finalize a transaction, committing on success or rolling back on failure.
///
/// A connection only goes back to the pool once no transaction is open on it.
fn finalize_transaction<T>(
    connection: PooledConnection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => match connection.execute_batch("COMMIT") {
            Ok(()) => Ok(value),
            Err(error) => {
                release_after_failure(connection);
                Err(error.into())
            }
        },
        Err(error) => {
            release_after_failure(connection);
            Err(error)
        }
    }
}

fn release_after_failure(connection: PooledConnection) {
    if let Err(error) = connection.execute_batch("ROLLBACK") {
        tracing::warn!(%error, "rollback failed, discarding warehouse connection");
        connection.discard();
    }
}

/// Resolve the marketpipe home directory from environment or default.
fn resolve_marketpipe_home() -> PathBuf {
    if let Some(path) = env::var_os("MARKETPIPE_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".marketpipe");
    }

    PathBuf::from(".marketpipe")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_temp(temp: &tempfile::TempDir) -> Warehouse {
        Warehouse::open(WarehouseConfig {
            marketpipe_home: temp.path().to_path_buf(),
            db_path: temp.path().join("data").join("prices.duckdb"),
            max_pool_size: 2,
        })
        .expect("warehouse open")
    }

    fn record(symbol: &str, price: f64, observed_at_ns: i64) -> PriceRecord {
        PriceRecord {
            symbol: symbol.to_string(),
            price,
            observed_at_ns,
            trace_id: None,
        }
    }

    #[test]
    fn initializes_schema_once() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(&temp);
        warehouse.initialize().expect("second initialize is a no-op");

        let connection = warehouse.manager.acquire().expect("connection");
        let versions = migrations::applied_versions(&connection).expect("versions");
        assert_eq!(versions, vec!["0001_price_points", "0002_indexes"]);
    }

    #[test]
    fn latest_prices_are_ordered_by_observation_time_not_insertion() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(&temp);

        warehouse.append_price(&record("BTC", 101.0, 2_000)).expect("append");
        warehouse.append_price(&record("BTC", 100.0, 1_000)).expect("append");
        warehouse.append_price(&record("BTC", 102.0, 3_000)).expect("append");
        warehouse.append_price(&record("ETH", 9.0, 4_000)).expect("append");

        let latest = warehouse.latest_prices("BTC", 2).expect("read");
        let prices: Vec<f64> = latest.iter().map(|row| row.price).collect();
        assert_eq!(prices, vec![102.0, 101.0]);
        assert_eq!(warehouse.count_prices("BTC").expect("count"), 3);
        assert_eq!(warehouse.count_prices("ETH").expect("count"), 1);
    }

    #[test]
    fn symbol_with_sql_metacharacters_is_stored_verbatim() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(&temp);
        let hostile = r#"BTC'; DROP TABLE price_points; --"#;

        warehouse.append_price(&record(hostile, 1.0, 1)).expect("append");

        let rows = warehouse.latest_prices(hostile, 10).expect("read");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, hostile);
    }

    #[test]
    fn rejects_non_positive_price_before_touching_the_database() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(&temp);

        let error = warehouse
            .append_price(&record("BTC", 0.0, 1))
            .expect_err("zero price must be rejected");
        assert!(matches!(error, WarehouseError::RecordRejected(_)));
        assert_eq!(warehouse.count_prices("BTC").expect("count"), 0);
    }

    #[test]
    fn failed_commit_does_not_return_an_open_transaction_to_the_pool() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(&temp);
        let idle_before = warehouse.manager.idle_len();

        let connection = warehouse.manager.acquire().expect("connection");
        connection.execute_batch("BEGIN TRANSACTION").expect("begin");
        // ending the transaction early makes the final COMMIT fail
        let result = (|| -> Result<(), WarehouseError> {
            connection.execute_batch("COMMIT")?;
            Ok(())
        })();
        let error = finalize_transaction(connection, result).expect_err("nothing to commit");

        assert!(matches!(error, WarehouseError::DuckDb(_)));
        assert_eq!(warehouse.manager.idle_len(), idle_before.saturating_sub(1));
        warehouse.append_price(&record("ADA", 0.5, 1)).expect("next append begins cleanly");
        assert_eq!(warehouse.count_prices("ADA").expect("count"), 1);
    }

    #[test]
    fn zero_limit_returns_nothing() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(&temp);
        warehouse.append_price(&record("SOL", 20.0, 1)).expect("append");

        assert!(warehouse.latest_prices("SOL", 0).expect("read").is_empty());
    }
}
