//! # Database Handle
//!
//! Opens the SQLite file, applies the schema and hands out repositories
//! and transactions.
//!
//! ## Writers and Readers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         One SQLite file (WAL)                           │
//! │                                                                         │
//! │   pool reads ──────────────┐      handler transaction                  │
//! │   (validation, history,    │      BEGIN                                 │
//! │    HTTP GETs)              │        first statement is a write          │
//! │                            ▼        ─► takes SQLite's write lock        │
//! │                     ┌────────────┐  ledger records, status CAS          │
//! │                     │ SqlitePool │  COMMIT / rollback on drop           │
//! │                     └────────────┘                                      │
//! │                                                                         │
//! │   A second writer waits up to `busy_timeout`, then DbError::Busy       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `:memory:` databases live and die with their one connection, so
//! [`DbConfig::in_memory`] pins the pool to a single connection. Never hold
//! a transaction and query the pool in the same task on such a database.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::catalog::CatalogRepository;
use crate::repository::idempotency::IdempotencyRegistry;
use crate::repository::ledger::StockLedger;
use crate::repository::order::OrderRepository;
use crate::repository::product::ProductRepository;
use crate::repository::purchase::PurchaseOrderRepository;
use crate::repository::transfer::TransferRepository;

const MEMORY: &str = ":memory:";

// =============================================================================
// Configuration
// =============================================================================

/// Where the stock database lives and how hard writers may contend.
///
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/stockline/stockline.db")
///     .max_connections(8)
///     .busy_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// SQLite file, or `:memory:`.
    pub database_path: PathBuf,

    pub max_connections: u32,

    /// How long a caller waits for a free pooled connection.
    pub acquire_timeout: Duration,

    /// How long a statement waits for SQLite's write lock.
    pub busy_timeout: Duration,

    /// Apply pending migrations when opening.
    pub migrate: bool,
}

impl DbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            migrate: true,
        }
    }

    /// Isolated throwaway database on a single connection.
    pub fn in_memory() -> Self {
        DbConfig {
            max_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            ..DbConfig::new(MEMORY)
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn migrate(mut self, migrate: bool) -> Self {
        self.migrate = migrate;
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == MEMORY
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        if self.is_in_memory() {
            let options = SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
            return Ok(options.foreign_keys(true));
        }

        Ok(SqliteConnectOptions::new()
            .filename(&self.database_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(self.busy_timeout))
    }
}

// =============================================================================
// Database
// =============================================================================

/// Cloneable handle on the stock database.
///
/// ```rust,ignore
/// let db = Database::new(DbConfig::new("./stockline.db")).await?;
///
/// let product = db.products().get(&ctx.tenant_id, &product_id).await?;
///
/// let mut tx = db.begin().await?;
/// StockLedger::record(&mut tx, entry).await?;
/// tx.commit().await?;
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// What `GET /health` reports about storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbHealth {
    pub reachable: bool,
    pub pending_migrations: usize,
}

impl DbHealth {
    pub fn is_ready(&self) -> bool {
        self.reachable && self.pending_migrations == 0
    }
}

impl Database {
    /// Opens (creating if needed) the database and applies the schema.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout);
        if config.is_in_memory() {
            // Recycling the only connection would drop the database with it
            pool_options = pool_options.min_connections(1).idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(config.connect_options()?)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            path = %config.database_path.display(),
            max_connections = config.max_connections,
            busy_timeout_ms = config.busy_timeout.as_millis() as u64,
            "Stock database opened"
        );

        let db = Database { pool };
        if config.migrate {
            migrations::run_migrations(&db.pool).await?;
        }
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Opens a transaction on a pooled connection.
    ///
    /// Dropping the transaction without `commit()` rolls it back.
    pub async fn begin(&self) -> DbResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub fn products(&self) -> ProductRepository {
        ProductRepository::new(self.pool.clone())
    }

    /// Branches, suppliers and customers.
    pub fn catalog(&self) -> CatalogRepository {
        CatalogRepository::new(self.pool.clone())
    }

    pub fn ledger(&self) -> StockLedger {
        StockLedger::new(self.pool.clone())
    }

    pub fn idempotency(&self) -> IdempotencyRegistry {
        IdempotencyRegistry::new(self.pool.clone())
    }

    pub fn orders(&self) -> OrderRepository {
        OrderRepository::new(self.pool.clone())
    }

    pub fn transfers(&self) -> TransferRepository {
        TransferRepository::new(self.pool.clone())
    }

    pub fn purchase_orders(&self) -> PurchaseOrderRepository {
        PurchaseOrderRepository::new(self.pool.clone())
    }

    pub async fn health(&self) -> DbHealth {
        let reachable = sqlx::query("SELECT 1").execute(&self.pool).await.is_ok();
        let pending_migrations = if reachable {
            match migrations::pending(&self.pool).await {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "Could not read migration state");
                    0
                }
            }
        } else {
            0
        };

        DbHealth {
            reachable,
            pending_migrations,
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Stock database closed");
    }
}
