//! # Workflow Handlers
//!
//! Each handler call is one unit of work: locks first, then one
//! transaction, then facts.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  validate + resolve ids (tenant-scoped reads, no locks)                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  StockLocks::acquire(all product keys, sorted)  ── timeout ─► LockTimeout│
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  BEGIN                                                                 │
//! │    first statement is a write (INSERT or status compare-and-set)       │
//! │    StockLedger::record × N                                             │
//! │  COMMIT            (any error: the transaction drops and rolls back)   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  release locks, publish LedgerFacts                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The pool is never used while a transaction is open.

mod order;
mod purchase;
mod stock;
mod transfer;

pub use order::OrderHandler;
pub use purchase::PurchaseHandler;
pub use stock::StockHandler;
pub use transfer::TransferHandler;

use std::time::Duration;

use crate::config::GatewayConfig;
use crate::error::SyncResult;
use crate::facts::FactBus;
use crate::locks::{StockGuard, StockLocks};
use stockline_core::{Branch, CoreError, IdempotencyRecord, Product, Transition};
use stockline_db::Database;

// =============================================================================
// Results
// =============================================================================

/// Result of an idempotent create.
#[derive(Debug, Clone)]
pub enum Synced<T> {
    Created(T),
    /// The client id (or transfer reference) was seen before; nothing ran.
    AlreadySynced(IdempotencyRecord),
}

impl<T> Synced<T> {
    pub fn is_created(&self) -> bool {
        matches!(self, Synced::Created(_))
    }
}

/// Entity after a state transition, and whether the call changed anything.
#[derive(Debug, Clone)]
pub struct Transitioned<T> {
    pub entity: T,
    pub transition: Transition,
}

impl<T> Transitioned<T> {
    pub fn applied(entity: T) -> Self {
        Transitioned {
            entity,
            transition: Transition::Apply,
        }
    }

    pub fn unchanged(entity: T) -> Self {
        Transitioned {
            entity,
            transition: Transition::AlreadyApplied,
        }
    }

    pub fn is_applied(&self) -> bool {
        self.transition.is_apply()
    }
}

// =============================================================================
// Handler Context
// =============================================================================

/// Shared by every handler: the store, the lock table and the fact bus.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    db: Database,
    locks: StockLocks,
    facts: FactBus,
    lock_wait: Duration,
}

impl HandlerContext {
    pub fn new(db: Database, locks: StockLocks, facts: FactBus, lock_wait: Duration) -> Self {
        HandlerContext {
            db,
            locks,
            facts,
            lock_wait,
        }
    }

    /// Opens the database described by `config` and builds a context on it.
    pub async fn connect(config: &GatewayConfig) -> SyncResult<Self> {
        let db = Database::new(config.db_config()).await?;
        Ok(HandlerContext::new(
            db,
            StockLocks::new(),
            FactBus::new(config.facts.channel_capacity),
            config.lock_wait(),
        ))
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn facts(&self) -> &FactBus {
        &self.facts
    }

    pub fn locks(&self) -> &StockLocks {
        &self.locks
    }

    pub(crate) async fn lock<I, S>(&self, keys: I) -> SyncResult<StockGuard>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.locks.acquire(keys, self.lock_wait).await
    }

    pub(crate) async fn require_branch(&self, tenant_id: &str, branch_id: &str) -> SyncResult<Branch> {
        self.db
            .catalog()
            .get_branch(tenant_id, branch_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Branch", branch_id).into())
    }

    pub(crate) async fn require_product(&self, tenant_id: &str, product_id: &str) -> SyncResult<Product> {
        self.db
            .products()
            .get(tenant_id, product_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Product", product_id).into())
    }
}

/// Rejects a product stocked at another branch than the workflow's.
pub(crate) fn require_branch_product(product: &Product, branch_id: &str) -> SyncResult<()> {
    if product.branch_id != branch_id {
        return Err(stockline_core::ValidationError::InvalidFormat {
            field: "items".to_string(),
            reason: format!("product {} is not stocked at branch {}", product.id, branch_id),
        }
        .into());
    }
    Ok(())
}

/// Attempts at a fresh generated reference before giving up.
pub(crate) const REFERENCE_ATTEMPTS: usize = 3;

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use stockline_core::{MovementType, TenantContext};
    use stockline_db::{DbConfig, NewMovement, NewProduct, StockLedger};

    pub const TENANT: &str = "tenant-a";

    pub fn tenant() -> TenantContext {
        TenantContext::new(TENANT).with_actor("clerk-1")
    }

    pub async fn context() -> HandlerContext {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        HandlerContext::new(db, StockLocks::new(), FactBus::new(64), Duration::from_secs(2))
    }

    pub async fn branch(ctx: &HandlerContext, name: &str) -> Branch {
        ctx.db().catalog().create_branch(TENANT, name).await.unwrap()
    }

    pub async fn product(ctx: &HandlerContext, branch: &Branch, sku: &str, qty: i64, cost_cents: i64) -> Product {
        let product = ctx
            .db()
            .products()
            .create(
                NewProduct::new(TENANT, &branch.id, sku, format!("{sku} item"))
                    .price(cost_cents * 2)
                    .cost(cost_cents)
                    .low_stock_threshold(3),
            )
            .await
            .unwrap();

        if qty != 0 {
            let mut tx = ctx.db().begin().await.unwrap();
            StockLedger::record(
                &mut tx,
                NewMovement::new(TENANT, &product.id, qty, MovementType::Adjustment, "OPENING"),
            )
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }

        ctx.db().products().get(TENANT, &product.id).await.unwrap().unwrap()
    }

    pub async fn stock(ctx: &HandlerContext, product_id: &str) -> i64 {
        ctx.db()
            .products()
            .get(TENANT, product_id)
            .await
            .unwrap()
            .unwrap()
            .stock_quantity
    }
}
