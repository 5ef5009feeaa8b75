//! # Order Repository
//!
//! Orders synced from terminals and their line items.
//!
//! ## Order Numbers
//! `order_seq` is a per-tenant counter assigned inside the INSERT itself
//! (`MAX(order_seq) + 1` under SQLite's write lock). Orders that arrive
//! without a number get `ORD-000042` from it.
//!
//! ## Stock Flag
//! `stock_deducted` is set in the same transaction as the sale movements.
//! [`OrderRepository::mark_completed`] only flips a pending order whose flag
//! is still clear, so a second completion matches no row.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use stockline_core::reference;
use stockline_core::{Order, OrderItem, OrderStatus, OrderingType, PaymentMethod};

// =============================================================================
// Insert Model
// =============================================================================

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub tenant_id: String,
    pub branch_id: String,
    pub customer_id: Option<String>,
    pub cashier_id: Option<String>,
    pub client_uuid: String,

    /// Terminal-assigned number; generated when `None`.
    pub order_number: Option<String>,
    pub status: OrderStatus,
    pub ordering_type: OrderingType,
    pub payment_method: PaymentMethod,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub items: Vec<NewOrderItem>,
}

#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: String,
    pub quantity: i64,
    pub price_cents: i64,
    pub cost_price_cents: i64,
}

// =============================================================================
// Repository
// =============================================================================

#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Gets an order with its items.
    pub async fn get(&self, tenant_id: &str, id: &str) -> DbResult<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        Self::load(&mut conn, tenant_id, id).await
    }

    pub async fn load(conn: &mut SqliteConnection, tenant_id: &str, id: &str) -> DbResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = ?1 AND tenant_id = ?2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&mut *conn)
            .await?;

        let Some(mut order) = order else {
            return Ok(None);
        };

        order.items = sqlx::query_as::<_, OrderItem>("SELECT * FROM order_items WHERE order_id = ?1 ORDER BY line_no")
            .bind(&order.id)
            .fetch_all(&mut *conn)
            .await?;

        Ok(Some(order))
    }

    /// Inserts the order header and its items.
    ///
    /// The header INSERT is the first statement of the caller's transaction.
    ///
    /// ## Errors
    /// * `DbError::UniqueViolation` on `client_uuid` - Already synced (a
    ///   concurrent replay committed first)
    pub async fn insert(conn: &mut SqliteConnection, new: &NewOrder) -> DbResult<Order> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let completed_at = (new.status == OrderStatus::Completed).then_some(now);
        let stock_deducted = new.status == OrderStatus::Completed;

        let order_seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO orders (
                id, tenant_id, branch_id, customer_id, cashier_id, client_uuid,
                order_seq, order_number, status, ordering_type, payment_method,
                subtotal_cents, tax_cents, total_cents, stock_deducted,
                created_at, updated_at, completed_at
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, next.seq, COALESCE(?7, ''), ?8, ?9, ?10,
                   ?11, ?12, ?13, ?14, ?15, ?15, ?16
              FROM (SELECT COALESCE(MAX(order_seq), 0) + 1 AS seq FROM orders WHERE tenant_id = ?2) AS next
            RETURNING order_seq
            "#,
        )
        .bind(&id)
        .bind(&new.tenant_id)
        .bind(&new.branch_id)
        .bind(&new.customer_id)
        .bind(&new.cashier_id)
        .bind(&new.client_uuid)
        .bind(&new.order_number)
        .bind(new.status)
        .bind(new.ordering_type)
        .bind(new.payment_method)
        .bind(new.subtotal_cents)
        .bind(new.tax_cents)
        .bind(new.total_cents)
        .bind(stock_deducted)
        .bind(now)
        .bind(completed_at)
        .fetch_one(&mut *conn)
        .await?;

        let order_number = match &new.order_number {
            Some(number) => number.clone(),
            None => {
                let number = reference::order_number(order_seq);
                sqlx::query("UPDATE orders SET order_number = ?1 WHERE id = ?2")
                    .bind(&number)
                    .bind(&id)
                    .execute(&mut *conn)
                    .await?;
                number
            }
        };

        let mut items = Vec::with_capacity(new.items.len());
        for (line_no, item) in new.items.iter().enumerate() {
            let item = OrderItem {
                id: Uuid::new_v4().to_string(),
                order_id: id.clone(),
                product_id: item.product_id.clone(),
                quantity: item.quantity,
                price_cents: item.price_cents,
                cost_price_cents: item.cost_price_cents,
                line_total_cents: item.price_cents * item.quantity,
                line_no: line_no as i64 + 1,
            };

            sqlx::query(
                r#"
                INSERT INTO order_items (
                    id, order_id, product_id, quantity, price_cents,
                    cost_price_cents, line_total_cents, line_no
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(&item.id)
            .bind(&item.order_id)
            .bind(&item.product_id)
            .bind(item.quantity)
            .bind(item.price_cents)
            .bind(item.cost_price_cents)
            .bind(item.line_total_cents)
            .bind(item.line_no)
            .execute(&mut *conn)
            .await?;

            items.push(item);
        }

        debug!(order_id = %id, order_number = %order_number, items = items.len(), "Order inserted");

        Ok(Order {
            id,
            tenant_id: new.tenant_id.clone(),
            branch_id: new.branch_id.clone(),
            customer_id: new.customer_id.clone(),
            cashier_id: new.cashier_id.clone(),
            client_uuid: new.client_uuid.clone(),
            order_number,
            status: new.status,
            ordering_type: new.ordering_type,
            payment_method: new.payment_method,
            subtotal_cents: new.subtotal_cents,
            tax_cents: new.tax_cents,
            total_cents: new.total_cents,
            stock_deducted,
            created_at: now,
            updated_at: now,
            completed_at,
            items,
        })
    }

    /// Pending → completed with the stock flag set.
    ///
    /// Returns `false` when the order was not pending-and-undeducted.
    pub async fn mark_completed(conn: &mut SqliteConnection, tenant_id: &str, id: &str) -> DbResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE orders
               SET status = 'completed', stock_deducted = 1, completed_at = ?1, updated_at = ?1
             WHERE id = ?2 AND tenant_id = ?3 AND status = 'pending' AND stock_deducted = 0
            "#,
        )
        .bind(now)
        .bind(id)
        .bind(tenant_id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Cancels an order that is not already cancelled.
    ///
    /// ## Returns
    /// * `Some(stock_deducted)` - Cancelled now; whether its stock had been taken
    /// * `None` - Already cancelled (or unknown)
    pub async fn mark_cancelled(conn: &mut SqliteConnection, tenant_id: &str, id: &str) -> DbResult<Option<bool>> {
        let deducted: Option<bool> = sqlx::query_scalar(
            r#"
            UPDATE orders
               SET status = 'cancelled', updated_at = ?1
             WHERE id = ?2 AND tenant_id = ?3 AND status <> 'cancelled'
            RETURNING stock_deducted
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(deducted)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
