//! # Schema Migrations
//!
//! The schema ships inside the binary (`migrations/*.sql`) and is applied
//! when a [`Database`](crate::Database) opens.
//!
//! ## What the schema guarantees
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  stock_movements   append-only (UPDATE/DELETE triggers abort)          │
//! │                    quantity_change <> 0                                │
//! │                    only an adjustment may leave balance_after < 0      │
//! │                                                                         │
//! │  orders            UNIQUE (tenant_id, client_uuid)                     │
//! │  stock_transfers   UNIQUE (tenant_id, client_uuid), UNIQUE reference_id│
//! │  purchase_orders   UNIQUE (tenant_id, client_uuid), UNIQUE reference_id│
//! │                    amount_paid_cents >= 0                              │
//! │  product_components quantity > 0, parent <> component, UNIQUE pair     │
//! │  supplier_credit_transactions  purchase | payment | adjustment         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Applied files are checksummed: change the schema by adding
//! `NNNN_description.sql`, never by editing a shipped file. The ledger
//! triggers also block migrations, so one that must rewrite ledger rows has
//! to drop and recreate them.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

/// Migrations embedded at compile time from `migrations/`.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Applies every migration not yet recorded in `_sqlx_migrations`.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    MIGRATOR.run(pool).await?;
    info!(known = MIGRATOR.migrations.len(), "Stock schema up to date");
    Ok(())
}

/// Number of embedded migrations the database has not applied.
///
/// A database that was never migrated has no bookkeeping table and reports
/// every migration as pending.
pub async fn pending(pool: &SqlitePool) -> DbResult<usize> {
    let has_table: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations')",
    )
    .fetch_one(pool)
    .await?;

    let applied: i64 = if has_table {
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await?
    } else {
        0
    };

    Ok(MIGRATOR
        .migrations
        .len()
        .saturating_sub(usize::try_from(applied).unwrap_or(usize::MAX)))
}
