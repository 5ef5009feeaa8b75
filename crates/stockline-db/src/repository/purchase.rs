//! # Purchase Order Repository
//!
//! Purchase orders and their lines. Receiving is the only point where a PO
//! touches the ledger; this repository only stores the header and lines.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use stockline_core::validation::checked_line_total;
use stockline_core::{CoreError, Money, PaymentMethod, PurchaseOrder, PurchaseOrderItem, PurchaseOrderStatus};

#[derive(Debug, Clone)]
pub struct NewPurchaseOrder {
    pub tenant_id: String,
    pub client_uuid: Option<String>,
    pub reference_id: String,
    pub branch_id: String,
    pub supplier_id: String,
    pub status: PurchaseOrderStatus,
    pub amount_paid_cents: i64,
    pub payment_method: PaymentMethod,
    pub expected_date: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub items: Vec<NewPurchaseOrderItem>,
}

#[derive(Debug, Clone)]
pub struct NewPurchaseOrderItem {
    pub product_id: String,
    pub quantity: i64,
    pub unit_cost_cents: i64,
}

impl NewPurchaseOrder {
    /// Σ quantity × unit cost.
    ///
    /// ## Errors
    /// * `CoreError::Validation` - The total does not fit in an `i64`
    pub fn total_cost_cents(&self) -> Result<i64, CoreError> {
        let lines = self.items.iter().map(|i| (Money::from_cents(i.unit_cost_cents), i.quantity));
        Ok(checked_line_total("total_cost_cents", lines)?.cents())
    }
}

#[derive(Debug, Clone)]
pub struct PurchaseOrderRepository {
    pool: SqlitePool,
}

impl PurchaseOrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PurchaseOrderRepository { pool }
    }

    pub async fn get(&self, tenant_id: &str, id: &str) -> DbResult<Option<PurchaseOrder>> {
        let mut conn = self.pool.acquire().await?;
        Self::load(&mut conn, tenant_id, id).await
    }

    pub async fn load(conn: &mut SqliteConnection, tenant_id: &str, id: &str) -> DbResult<Option<PurchaseOrder>> {
        let po = sqlx::query_as::<_, PurchaseOrder>("SELECT * FROM purchase_orders WHERE id = ?1 AND tenant_id = ?2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&mut *conn)
            .await?;

        let Some(mut po) = po else {
            return Ok(None);
        };

        po.items = sqlx::query_as::<_, PurchaseOrderItem>(
            "SELECT * FROM purchase_order_items WHERE purchase_order_id = ?1 ORDER BY line_no",
        )
        .bind(&po.id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(Some(po))
    }

    /// Inserts the PO header and lines.
    ///
    /// ## Errors
    /// * `DbError::UniqueViolation` on `client_uuid` or `reference_id`
    pub async fn insert(conn: &mut SqliteConnection, new: &NewPurchaseOrder) -> DbResult<PurchaseOrder> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let total_cost_cents = new.total_cost_cents()?;

        sqlx::query(
            r#"
            INSERT INTO purchase_orders (
                id, tenant_id, client_uuid, reference_id, branch_id, supplier_id, status,
                total_cost_cents, amount_paid_cents, payment_method,
                expected_date, notes, created_by, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
            "#,
        )
        .bind(&id)
        .bind(&new.tenant_id)
        .bind(&new.client_uuid)
        .bind(&new.reference_id)
        .bind(&new.branch_id)
        .bind(&new.supplier_id)
        .bind(new.status)
        .bind(total_cost_cents)
        .bind(new.amount_paid_cents)
        .bind(new.payment_method)
        .bind(&new.expected_date)
        .bind(&new.notes)
        .bind(&new.created_by)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        let mut items = Vec::with_capacity(new.items.len());
        for (line_no, item) in new.items.iter().enumerate() {
            let item = PurchaseOrderItem {
                id: Uuid::new_v4().to_string(),
                purchase_order_id: id.clone(),
                product_id: item.product_id.clone(),
                quantity: item.quantity,
                unit_cost_cents: item.unit_cost_cents,
                received_quantity: 0,
                line_no: line_no as i64 + 1,
            };

            sqlx::query(
                r#"
                INSERT INTO purchase_order_items (
                    id, purchase_order_id, product_id, quantity, unit_cost_cents, received_quantity, line_no
                ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
                "#,
            )
            .bind(&item.id)
            .bind(&item.purchase_order_id)
            .bind(&item.product_id)
            .bind(item.quantity)
            .bind(item.unit_cost_cents)
            .bind(item.line_no)
            .execute(&mut *conn)
            .await?;

            items.push(item);
        }

        debug!(po_id = %id, reference = %new.reference_id, total_cost_cents, "Purchase order inserted");

        Ok(PurchaseOrder {
            id,
            tenant_id: new.tenant_id.clone(),
            client_uuid: new.client_uuid.clone(),
            reference_id: new.reference_id.clone(),
            branch_id: new.branch_id.clone(),
            supplier_id: new.supplier_id.clone(),
            status: new.status,
            total_cost_cents,
            amount_paid_cents: new.amount_paid_cents,
            payment_method: new.payment_method,
            expected_date: new.expected_date.clone(),
            notes: new.notes.clone(),
            created_by: new.created_by.clone(),
            created_at: now,
            updated_at: now,
            received_at: None,
            items,
        })
    }

    /// Compare-and-set on the PO status; sets `received_at` on `received`.
    pub async fn set_status(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        id: &str,
        from: PurchaseOrderStatus,
        to: PurchaseOrderStatus,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE purchase_orders
               SET status = ?1,
                   updated_at = ?2,
                   received_at = CASE WHEN ?1 = 'received' THEN ?2 ELSE received_at END
             WHERE id = ?3 AND tenant_id = ?4 AND status = ?5
            "#,
        )
        .bind(to)
        .bind(Utc::now())
        .bind(id)
        .bind(tenant_id)
        .bind(from)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Stores what actually arrived on one line.
    pub async fn record_receipt(
        conn: &mut SqliteConnection,
        item_id: &str,
        received_quantity: i64,
        unit_cost_cents: i64,
    ) -> DbResult<()> {
        sqlx::query("UPDATE purchase_order_items SET received_quantity = ?1, unit_cost_cents = ?2 WHERE id = ?3")
            .bind(received_quantity)
            .bind(unit_cost_cents)
            .bind(item_id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
