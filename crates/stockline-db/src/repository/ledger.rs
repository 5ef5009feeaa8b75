//! # Stock Ledger
//!
//! Append-only record of every quantity change, carrying the resulting
//! balance. The product's `stock_quantity` is a cached projection of it.
//!
//! ## Recording a Movement
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                StockLedger::record (inside caller's tx)                 │
//! │                                                                         │
//! │  quantity_change == 0 ?  ──yes──► InvalidQuantity                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  UPDATE products                                                       │
//! │     SET stock_quantity = stock_quantity + Δ, version = version + 1     │
//! │   WHERE id/tenant match AND (adjustment OR stock + Δ >= 0)             │
//! │   RETURNING stock_quantity                                             │
//! │       │                                                                 │
//! │       ├── no row ──► product missing?  NotFound                        │
//! │       │              otherwise         InsufficientStock               │
//! │       ▼                                                                 │
//! │  INSERT stock_movements (Δ, balance_after, type, reference, ...)       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  MovementRecord                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Check and update are one statement, so the balance can never be read
//! stale between them. Both writes share the caller's transaction: a
//! rollback drops the movement and the cached stock change together.
//!
//! ## Balance Invariant
//! Ordered by `seq`, `balance_after[n] == balance_after[n-1] + quantity_change[n]`,
//! starting from zero. [`StockLedger::audit`] replays it.

use chrono::Utc;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use stockline_core::{CoreError, MovementType, StockMovement};

// =============================================================================
// Types
// =============================================================================

/// A movement to append.
#[derive(Debug, Clone, Copy)]
pub struct NewMovement<'a> {
    pub tenant_id: &'a str,
    pub product_id: &'a str,
    pub quantity_change: i64,
    pub movement_type: MovementType,

    /// Order number, transfer reference or PO reference.
    pub reference: &'a str,
    pub notes: Option<&'a str>,
    pub actor_id: Option<&'a str>,
    pub batch_id: Option<&'a str>,
}

impl<'a> NewMovement<'a> {
    pub fn new(
        tenant_id: &'a str,
        product_id: &'a str,
        quantity_change: i64,
        movement_type: MovementType,
        reference: &'a str,
    ) -> Self {
        NewMovement {
            tenant_id,
            product_id,
            quantity_change,
            movement_type,
            reference,
            notes: None,
            actor_id: None,
            batch_id: None,
        }
    }

    pub fn notes(mut self, notes: Option<&'a str>) -> Self {
        self.notes = notes;
        self
    }

    pub fn actor(mut self, actor_id: Option<&'a str>) -> Self {
        self.actor_id = actor_id;
        self
    }

    pub fn batch(mut self, batch_id: Option<&'a str>) -> Self {
        self.batch_id = batch_id;
        self
    }
}

/// Result of [`StockLedger::record`].
#[derive(Debug, Clone)]
pub struct MovementRecord {
    pub movement: StockMovement,
    pub previous_balance: i64,
    pub low_stock_threshold: i64,
}

impl MovementRecord {
    pub fn balance_after(&self) -> i64 {
        self.movement.balance_after
    }

    /// True when this movement took the balance from above the product's
    /// low-stock threshold to at or below it.
    pub fn crossed_low_stock(&self) -> bool {
        self.previous_balance > self.low_stock_threshold
            && self.movement.balance_after <= self.low_stock_threshold
    }
}

/// Outcome of replaying one product's ledger from zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerAudit {
    pub product_id: String,
    pub cached_quantity: i64,
    pub replayed_quantity: i64,
    pub movement_count: usize,

    /// `seq` of the first movement whose `balance_after` does not follow
    /// from the one before it.
    pub first_break: Option<i64>,
}

impl LedgerAudit {
    pub fn is_consistent(&self) -> bool {
        self.first_break.is_none() && self.cached_quantity == self.replayed_quantity
    }
}

// =============================================================================
// Ledger
// =============================================================================

#[derive(Debug, Clone)]
pub struct StockLedger {
    pool: SqlitePool,
}

impl StockLedger {
    pub fn new(pool: SqlitePool) -> Self {
        StockLedger { pool }
    }

    /// Appends one movement and moves the cached balance with it.
    ///
    /// The caller must hold the product's stock lock and own the transaction
    /// `conn` belongs to.
    ///
    /// ## Errors
    /// * `CoreError::InvalidQuantity` - `quantity_change == 0`
    /// * `CoreError::NotFound` - No such product for this tenant
    /// * `CoreError::InsufficientStock` - Balance would go negative and the
    ///   movement is not an adjustment
    pub async fn record(conn: &mut SqliteConnection, entry: NewMovement<'_>) -> DbResult<MovementRecord> {
        if entry.quantity_change == 0 {
            return Err(CoreError::InvalidQuantity {
                product_id: entry.product_id.to_string(),
            }
            .into());
        }

        let now = Utc::now();

        let updated: Option<(i64, i64, String)> = sqlx::query_as(
            r#"
            UPDATE products
               SET stock_quantity = stock_quantity + ?1,
                   version = version + 1,
                   updated_at = ?2
             WHERE id = ?3 AND tenant_id = ?4
               AND (?5 OR stock_quantity + ?1 >= 0)
            RETURNING stock_quantity, low_stock_threshold, branch_id
            "#,
        )
        .bind(entry.quantity_change)
        .bind(now)
        .bind(entry.product_id)
        .bind(entry.tenant_id)
        .bind(entry.movement_type.allows_negative_balance())
        .fetch_optional(&mut *conn)
        .await?;

        let Some((balance_after, low_stock_threshold, branch_id)) = updated else {
            return Err(Self::rejection(conn, &entry).await);
        };

        let mut movement = StockMovement {
            seq: 0,
            id: Uuid::new_v4().to_string(),
            tenant_id: entry.tenant_id.to_string(),
            branch_id,
            product_id: entry.product_id.to_string(),
            batch_id: entry.batch_id.map(str::to_string),
            quantity_change: entry.quantity_change,
            balance_after,
            movement_type: entry.movement_type,
            reference: entry.reference.to_string(),
            notes: entry.notes.map(str::to_string),
            actor_id: entry.actor_id.map(str::to_string),
            created_at: now,
        };

        movement.seq = sqlx::query_scalar(
            r#"
            INSERT INTO stock_movements (
                id, tenant_id, branch_id, product_id, batch_id, quantity_change,
                balance_after, movement_type, reference, notes, actor_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            RETURNING seq
            "#,
        )
        .bind(&movement.id)
        .bind(&movement.tenant_id)
        .bind(&movement.branch_id)
        .bind(&movement.product_id)
        .bind(&movement.batch_id)
        .bind(movement.quantity_change)
        .bind(movement.balance_after)
        .bind(movement.movement_type)
        .bind(&movement.reference)
        .bind(&movement.notes)
        .bind(&movement.actor_id)
        .bind(movement.created_at)
        .fetch_one(&mut *conn)
        .await?;

        debug!(
            product_id = %movement.product_id,
            movement_type = %movement.movement_type,
            quantity_change = movement.quantity_change,
            balance_after = movement.balance_after,
            reference = %movement.reference,
            "Stock movement recorded"
        );

        Ok(MovementRecord {
            previous_balance: balance_after - entry.quantity_change,
            low_stock_threshold,
            movement,
        })
    }

    /// Works out why the guarded UPDATE matched no row.
    async fn rejection(conn: &mut SqliteConnection, entry: &NewMovement<'_>) -> DbError {
        let current: Result<Option<(i64, String)>, sqlx::Error> =
            sqlx::query_as("SELECT stock_quantity, sku FROM products WHERE id = ?1 AND tenant_id = ?2")
                .bind(entry.product_id)
                .bind(entry.tenant_id)
                .fetch_optional(&mut *conn)
                .await;

        match current {
            Ok(None) => CoreError::not_found("Product", entry.product_id).into(),
            Ok(Some((available, sku))) => {
                warn!(
                    product_id = %entry.product_id,
                    available,
                    requested = entry.quantity_change.saturating_abs(),
                    "Insufficient stock"
                );
                CoreError::InsufficientStock {
                    product_id: entry.product_id.to_string(),
                    sku,
                    available,
                    requested: entry.quantity_change.saturating_abs(),
                }
                .into()
            }
            Err(e) => e.into(),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// All movements of one product, oldest first.
    pub async fn history(&self, tenant_id: &str, product_id: &str) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(
            "SELECT * FROM stock_movements WHERE tenant_id = ?1 AND product_id = ?2 ORDER BY seq",
        )
        .bind(tenant_id)
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// Movements correlated to one order number / transfer / PO reference.
    pub async fn by_reference(&self, tenant_id: &str, reference: &str) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(
            "SELECT * FROM stock_movements WHERE tenant_id = ?1 AND reference = ?2 ORDER BY seq",
        )
        .bind(tenant_id)
        .bind(reference)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// Replays the product's ledger from zero and compares it with the
    /// cached `stock_quantity`.
    pub async fn audit(&self, tenant_id: &str, product_id: &str) -> DbResult<LedgerAudit> {
        let cached: Option<i64> =
            sqlx::query_scalar("SELECT stock_quantity FROM products WHERE id = ?1 AND tenant_id = ?2")
                .bind(product_id)
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;
        let cached_quantity = cached.ok_or_else(|| DbError::not_found("Product", product_id))?;

        let movements = self.history(tenant_id, product_id).await?;

        let mut replayed = 0i64;
        let mut first_break = None;
        for movement in &movements {
            replayed += movement.quantity_change;
            if first_break.is_none() && movement.balance_after != replayed {
                first_break = Some(movement.seq);
            }
        }

        let audit = LedgerAudit {
            product_id: product_id.to_string(),
            cached_quantity,
            replayed_quantity: replayed,
            movement_count: movements.len(),
            first_break,
        };

        if !audit.is_consistent() {
            warn!(
                product_id = %product_id,
                cached = cached_quantity,
                replayed,
                "Ledger does not reconstruct cached stock"
            );
        }

        Ok(audit)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
