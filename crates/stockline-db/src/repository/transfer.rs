//! # Transfer Repository
//!
//! Stock transfers between two branches of a tenant.
//!
//! Status changes go through [`TransferRepository::set_status`], a
//! compare-and-set on the current status. The handler runs it as the first
//! statement of its transaction, so two concurrent `ship` calls cannot both
//! see `approved`.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use stockline_core::{StockTransfer, StockTransferItem, TransferStatus};

#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub tenant_id: String,
    pub client_uuid: Option<String>,
    pub reference_id: String,
    pub source_branch_id: String,
    pub destination_branch_id: String,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub items: Vec<NewTransferItem>,
}

#[derive(Debug, Clone)]
pub struct NewTransferItem {
    /// Product in the source branch.
    pub product_id: String,
    pub quantity: i64,
    pub transfer_price_cents: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct TransferRepository {
    pool: SqlitePool,
}

impl TransferRepository {
    pub fn new(pool: SqlitePool) -> Self {
        TransferRepository { pool }
    }

    pub async fn get(&self, tenant_id: &str, id: &str) -> DbResult<Option<StockTransfer>> {
        let mut conn = self.pool.acquire().await?;
        Self::load(&mut conn, tenant_id, id).await
    }

    /// Transfers of a tenant, newest first, optionally filtered by status.
    pub async fn list(&self, tenant_id: &str, status: Option<TransferStatus>) -> DbResult<Vec<StockTransfer>> {
        let transfers = sqlx::query_as::<_, StockTransfer>(
            r#"
            SELECT * FROM stock_transfers
             WHERE tenant_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        Ok(transfers)
    }

    pub async fn load(conn: &mut SqliteConnection, tenant_id: &str, id: &str) -> DbResult<Option<StockTransfer>> {
        let transfer =
            sqlx::query_as::<_, StockTransfer>("SELECT * FROM stock_transfers WHERE id = ?1 AND tenant_id = ?2")
                .bind(id)
                .bind(tenant_id)
                .fetch_optional(&mut *conn)
                .await?;

        let Some(mut transfer) = transfer else {
            return Ok(None);
        };

        transfer.items = sqlx::query_as::<_, StockTransferItem>(
            "SELECT * FROM stock_transfer_items WHERE transfer_id = ?1 ORDER BY line_no",
        )
        .bind(&transfer.id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(Some(transfer))
    }

    /// Inserts a `requested` transfer and its items.
    ///
    /// ## Errors
    /// * `DbError::UniqueViolation` on `client_uuid` or `reference_id`
    pub async fn insert(conn: &mut SqliteConnection, new: &NewTransfer) -> DbResult<StockTransfer> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO stock_transfers (
                id, tenant_id, client_uuid, reference_id, source_branch_id,
                destination_branch_id, status, notes, created_by, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            "#,
        )
        .bind(&id)
        .bind(&new.tenant_id)
        .bind(&new.client_uuid)
        .bind(&new.reference_id)
        .bind(&new.source_branch_id)
        .bind(&new.destination_branch_id)
        .bind(TransferStatus::Requested)
        .bind(&new.notes)
        .bind(&new.created_by)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        let mut items = Vec::with_capacity(new.items.len());
        for (line_no, item) in new.items.iter().enumerate() {
            let item = StockTransferItem {
                id: Uuid::new_v4().to_string(),
                transfer_id: id.clone(),
                product_id: item.product_id.clone(),
                quantity: item.quantity,
                transfer_price_cents: item.transfer_price_cents,
                line_no: line_no as i64 + 1,
            };

            sqlx::query(
                r#"
                INSERT INTO stock_transfer_items (id, transfer_id, product_id, quantity, transfer_price_cents, line_no)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(&item.id)
            .bind(&item.transfer_id)
            .bind(&item.product_id)
            .bind(item.quantity)
            .bind(item.transfer_price_cents)
            .bind(item.line_no)
            .execute(&mut *conn)
            .await?;

            items.push(item);
        }

        debug!(transfer_id = %id, reference = %new.reference_id, items = items.len(), "Transfer inserted");

        Ok(StockTransfer {
            id,
            tenant_id: new.tenant_id.clone(),
            client_uuid: new.client_uuid.clone(),
            reference_id: new.reference_id.clone(),
            source_branch_id: new.source_branch_id.clone(),
            destination_branch_id: new.destination_branch_id.clone(),
            status: TransferStatus::Requested,
            notes: new.notes.clone(),
            created_by: new.created_by.clone(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            items,
        })
    }

    /// Moves the transfer to `to` if its current status is one of `from`.
    ///
    /// Sets `completed_at` when `to` is `completed`. Returns `false` when no
    /// row matched (unknown id or a status outside `from`).
    pub async fn set_status(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        id: &str,
        from: &[TransferStatus],
        to: TransferStatus,
    ) -> DbResult<bool> {
        if from.is_empty() {
            return Ok(false);
        }

        let placeholders = (0..from.len())
            .map(|i| format!("?{}", i + 5))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            r#"
            UPDATE stock_transfers
               SET status = ?1,
                   updated_at = ?2,
                   completed_at = CASE WHEN ?1 = 'completed' THEN ?2 ELSE completed_at END
             WHERE id = ?3 AND tenant_id = ?4 AND status IN ({placeholders})
            "#
        );

        let mut query = sqlx::query(&sql).bind(to).bind(Utc::now()).bind(id).bind(tenant_id);
        for status in from {
            query = query.bind(*status);
        }

        let result = query.execute(&mut *conn).await?;
        Ok(result.rows_affected() == 1)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures::{self, TENANT};
    use crate::{Database, DbError};
    use stockline_core::Branch;

    async fn requested(db: &Database, source: &Branch, destination: &Branch, reference_id: &str) -> StockTransfer {
        let product = fixtures::stocked_product(db, source, &format!("SKU-{reference_id}"), 10, 100).await;

        let mut tx = db.begin().await.unwrap();
        let transfer = TransferRepository::insert(
            &mut tx,
            &NewTransfer {
                tenant_id: TENANT.to_string(),
                client_uuid: None,
                reference_id: reference_id.to_string(),
                source_branch_id: source.id.clone(),
                destination_branch_id: destination.id.clone(),
                notes: Some("weekly restock".to_string()),
                created_by: Some("manager-1".to_string()),
                items: vec![NewTransferItem {
                    product_id: product.id,
                    quantity: 4,
                    transfer_price_cents: Some(120),
                }],
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        transfer
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let db = fixtures::database().await;
        let main = fixtures::branch(&db, "Main").await;
        let annex = fixtures::branch(&db, "Annex").await;
        let transfer = requested(&db, &main, &annex, "TRF-00000001").await;

        let loaded = db.transfers().get(TENANT, &transfer.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TransferStatus::Requested);
        assert_eq!(loaded.items.len(), 1);
        assert_eq!(loaded.items[0].transfer_price_cents, Some(120));

        assert!(db.transfers().get("tenant-b", &transfer.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reference_is_unique() {
        let db = fixtures::database().await;
        let main = fixtures::branch(&db, "Main").await;
        let annex = fixtures::branch(&db, "Annex").await;
        let first = requested(&db, &main, &annex, "TRF-00000001").await;

        let mut tx = db.begin().await.unwrap();
        let err = TransferRepository::insert(
            &mut tx,
            &NewTransfer {
                tenant_id: TENANT.to_string(),
                client_uuid: None,
                reference_id: first.reference_id.clone(),
                source_branch_id: main.id.clone(),
                destination_branch_id: annex.id.clone(),
                notes: None,
                created_by: None,
                items: vec![],
            },
        )
        .await
        .unwrap_err();
        assert!(err.is_unique_on("reference_id"), "unexpected error: {err:?}");
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_set_status_is_compare_and_set() {
        let db = fixtures::database().await;
        let main = fixtures::branch(&db, "Main").await;
        let annex = fixtures::branch(&db, "Annex").await;
        let transfer = requested(&db, &main, &annex, "TRF-00000001").await;

        let mut tx = db.begin().await.unwrap();
        // Not approved yet: ship matches nothing
        assert!(!TransferRepository::set_status(
            &mut tx,
            TENANT,
            &transfer.id,
            &[TransferStatus::Approved],
            TransferStatus::Shipped
        )
        .await
        .unwrap());

        for (from, to) in [
            (TransferStatus::Requested, TransferStatus::Approved),
            (TransferStatus::Approved, TransferStatus::Shipped),
            (TransferStatus::Shipped, TransferStatus::Completed),
        ] {
            assert!(TransferRepository::set_status(&mut tx, TENANT, &transfer.id, &[from], to)
                .await
                .unwrap());
        }
        tx.commit().await.unwrap();

        let loaded = db.transfers().get(TENANT, &transfer.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TransferStatus::Completed);
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_list_by_status() {
        let db = fixtures::database().await;
        let main = fixtures::branch(&db, "Main").await;
        let annex = fixtures::branch(&db, "Annex").await;
        let a = requested(&db, &main, &annex, "TRF-0000000A").await;
        requested(&db, &main, &annex, "TRF-0000000B").await;

        let mut tx = db.begin().await.unwrap();
        TransferRepository::set_status(
            &mut tx,
            TENANT,
            &a.id,
            &[TransferStatus::Requested, TransferStatus::Approved],
            TransferStatus::Cancelled,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(db.transfers().list(TENANT, None).await.unwrap().len(), 2);
        let cancelled = db.transfers().list(TENANT, Some(TransferStatus::Cancelled)).await.unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].id, a.id);
    }
}
