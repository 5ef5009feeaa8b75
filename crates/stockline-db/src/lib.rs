//! # stockline-db: Database Layer for Stockline
//!
//! SQLite storage for the stock core: the append-only ledger, the
//! idempotency lookups and the order/transfer/purchase-order tables.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockline Data Flow                              │
//! │                                                                         │
//! │  stockline-sync handler (ship transfer)                                │
//! │       │  locks acquired, db.begin()                                    │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  stockline-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ StockLedger   │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ Idempotency   │    │ 0001_initial │  │   │
//! │  │   │ Transactions  │    │ Orders, ...   │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL)                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two Kinds of Repository Method
//!
//! - `&self` methods run on the pool and are for reads outside a workflow
//!   (pre-validation, history, HTTP reads).
//! - Associated functions taking `&mut SqliteConnection` run inside a
//!   caller-owned transaction. Pass `&mut tx`.
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Ledger, idempotency and entity repositories
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockline_db::{Database, DbConfig, NewMovement, StockLedger};
//!
//! let db = Database::new(DbConfig::new("stockline.db")).await?;
//!
//! let mut tx = db.begin().await?;
//! let record = StockLedger::record(&mut tx, NewMovement::new(
//!     &ctx.tenant_id, &product_id, 5, MovementType::Adjustment, "COUNT-2024-03",
//! )).await?;
//! tx.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig, DbHealth};

// Repository re-exports for convenience
pub use repository::catalog::{CatalogRepository, NewSupplierCredit};
pub use repository::idempotency::IdempotencyRegistry;
pub use repository::ledger::{LedgerAudit, MovementRecord, NewMovement, StockLedger};
pub use repository::order::{NewOrder, NewOrderItem, OrderRepository};
pub use repository::product::{NewProduct, ProductRepository};
pub use repository::purchase::{NewPurchaseOrder, NewPurchaseOrderItem, PurchaseOrderRepository};
pub use repository::transfer::{NewTransfer, NewTransferItem, TransferRepository};
