//! # Repository Module
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repositories and Transactions                        │
//! │                                                                         │
//! │  Handler                                                               │
//! │       │                                                                 │
//! │       │  db.products().get(tenant, id)       ← pool read               │
//! │       │                                                                 │
//! │       │  let mut tx = db.begin()                                       │
//! │       │  TransferRepository::set_status(&mut tx, ...)  ← first write   │
//! │       │  StockLedger::record(&mut tx, ...)                             │
//! │       │  tx.commit()                                                   │
//! │       ▼                                                                 │
//! │  SQLite                                                                │
//! │                                                                         │
//! │  Inside a transaction only the transaction's connection is used;       │
//! │  an in-memory database has a single pooled connection.                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`catalog::CatalogRepository`] - Branches, suppliers, customers
//! - [`product::ProductRepository`] - Products and their cached stock
//! - [`ledger::StockLedger`] - Append-only stock movements
//! - [`idempotency::IdempotencyRegistry`] - Client uuid / reference lookups
//! - [`order::OrderRepository`] - Orders and order items
//! - [`transfer::TransferRepository`] - Stock transfers
//! - [`purchase::PurchaseOrderRepository`] - Purchase orders

pub mod catalog;
pub mod idempotency;
pub mod ledger;
pub mod order;
pub mod product;
pub mod purchase;
pub mod transfer;

/// Fixtures shared by the repository tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use stockline_core::{Branch, MovementType, Product};

    use crate::repository::ledger::{NewMovement, StockLedger};
    use crate::repository::product::NewProduct;
    use crate::{Database, DbConfig};

    pub const TENANT: &str = "tenant-a";

    pub async fn database() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    pub async fn branch(db: &Database, name: &str) -> Branch {
        db.catalog().create_branch(TENANT, name).await.unwrap()
    }

    /// A product with opening stock booked through the ledger.
    pub async fn stocked_product(db: &Database, branch: &Branch, sku: &str, qty: i64, cost_cents: i64) -> Product {
        let product = db
            .products()
            .create(NewProduct::new(TENANT, &branch.id, sku, sku).price(cost_cents * 2).cost(cost_cents))
            .await
            .unwrap();

        if qty != 0 {
            let mut tx = db.begin().await.unwrap();
            StockLedger::record(
                &mut tx,
                NewMovement::new(TENANT, &product.id, qty, MovementType::Adjustment, "OPENING"),
            )
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }

        db.products().get(TENANT, &product.id).await.unwrap().unwrap()
    }
}
