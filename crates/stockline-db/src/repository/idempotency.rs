//! # Idempotency Registry
//!
//! Resolves a client transaction id to the entity it already produced.
//!
//! ## How Replays Are Made Safe
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Envelope (uuid = U)                                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  lookup(tenant, kind, U) ──found──► already synced (no side effects)   │
//! │       │ not found                                                       │
//! │       ▼                                                                 │
//! │  INSERT ... client_uuid = U   ← UNIQUE (tenant_id, client_uuid)        │
//! │       │                                                                 │
//! │       ├── ok ──────────────► created                                    │
//! │       │                                                                 │
//! │       └── UniqueViolation ─► a concurrent replay won the race:         │
//! │                              lookup again ──► already synced            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! There is no separate registry table: the constraint lives on the entity
//! tables themselves, so the record and the entity commit together.

use sqlx::SqlitePool;

use crate::error::DbResult;
use stockline_core::{EntityKind, IdempotencyRecord};

#[derive(Debug, Clone)]
pub struct IdempotencyRegistry {
    pool: SqlitePool,
}

impl IdempotencyRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        IdempotencyRegistry { pool }
    }

    /// Finds the entity a client uuid produced for this tenant.
    pub async fn lookup(
        &self,
        tenant_id: &str,
        kind: EntityKind,
        client_uuid: &str,
    ) -> DbResult<Option<IdempotencyRecord>> {
        let sql = match kind {
            EntityKind::Order => {
                "SELECT id AS entity_id, order_number AS reference, client_uuid
                   FROM orders WHERE tenant_id = ?1 AND client_uuid = ?2"
            }
            EntityKind::Transfer => {
                "SELECT id AS entity_id, reference_id AS reference, client_uuid
                   FROM stock_transfers WHERE tenant_id = ?1 AND client_uuid = ?2"
            }
            EntityKind::PurchaseOrder => {
                "SELECT id AS entity_id, reference_id AS reference, client_uuid
                   FROM purchase_orders WHERE tenant_id = ?1 AND client_uuid = ?2"
            }
        };

        let record = sqlx::query_as::<_, IdempotencyRecord>(sql)
            .bind(tenant_id)
            .bind(client_uuid)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    /// Transfers are also matched on a client-supplied reference id.
    ///
    /// Either key may be absent (online requests carry no client uuid).
    pub async fn lookup_transfer(
        &self,
        tenant_id: &str,
        client_uuid: Option<&str>,
        reference_id: Option<&str>,
    ) -> DbResult<Option<IdempotencyRecord>> {
        let record = sqlx::query_as::<_, IdempotencyRecord>(
            r#"
            SELECT id AS entity_id, reference_id AS reference, client_uuid
              FROM stock_transfers
             WHERE tenant_id = ?1
               AND ((?2 IS NOT NULL AND client_uuid = ?2) OR (?3 IS NOT NULL AND reference_id = ?3))
             ORDER BY created_at
             LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(client_uuid)
        .bind(reference_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}
