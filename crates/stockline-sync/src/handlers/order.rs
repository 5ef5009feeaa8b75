//! # Order Completion Handler
//!
//! Turns a replayed sale into an order plus its `sale` movements.
//!
//! ## Order Lifecycle
//! ```text
//!  sync_order ──► pending ──complete_pending_order──► completed
//!      │             │                                   │
//!      │             └──────────── void_order ───────────┤
//!      ▼                                                 ▼
//!  completed ─────────────────── void_order ────────► cancelled
//! ```
//!
//! Stock leaves the shelf exactly once: in `sync_order` when the order
//! arrives completed, or in `complete_pending_order`. Both flip
//! `stock_deducted` in the same transaction as the movements. Voiding a
//! deducted order books one `return` per line.
//!
//! A composite product never moves itself. Its line is expanded into one
//! movement per component (`component qty × line qty`), and the locks are
//! taken on the components.

use tracing::{debug, info, warn};

use super::{require_branch_product, HandlerContext, Synced, Transitioned};
use crate::error::{SyncError, SyncResult};
use crate::facts::LedgerFact;
use crate::protocol::OrderPayload;
use stockline_core::validation::{
    checked_line_total, validate_line_count, validate_price_cents, validate_quantity, validate_uuid,
};
use stockline_core::{
    CoreError, EntityKind, Money, MovementType, Order, OrderStatus, TenantContext, Transition, ValidationError,
    MAX_PRICE_CENTS,
};
use stockline_db::{MovementRecord, NewMovement, NewOrder, NewOrderItem, OrderRepository, StockLedger};

#[derive(Debug, Clone)]
pub struct OrderHandler {
    ctx: HandlerContext,
}

impl OrderHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        OrderHandler { ctx }
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Records a terminal's sale exactly once per `client_uuid`.
    ///
    /// ## Errors
    /// * Validation - bad uuid, no lines, unknown branch/customer/product, or
    ///   a product from another branch
    /// * `CoreError::InsufficientStock` - A completed order would oversell;
    ///   nothing is written
    /// * `SyncError::LockTimeout` - Product locks were busy
    pub async fn sync_order(
        &self,
        tenant: &TenantContext,
        client_uuid: &str,
        payload: OrderPayload,
    ) -> SyncResult<Synced<Order>> {
        let tenant_id = tenant.tenant_id.as_str();
        validate_uuid("uuid", client_uuid)?;

        let registry = self.ctx.db().idempotency();
        if let Some(existing) = registry.lookup(tenant_id, EntityKind::Order, client_uuid).await? {
            debug!(client_uuid, order_number = %existing.reference, "Order already synced");
            return Ok(Synced::AlreadySynced(existing));
        }

        let new = self.prepare(tenant, client_uuid, payload).await?;

        // Pending orders do not touch stock, so they take no locks.
        let deducts = new.status == OrderStatus::Completed;
        let (plan, guard) = if deducts {
            let lines: Vec<(&str, i64)> =
                new.items.iter().map(|i| (i.product_id.as_str(), i.quantity)).collect();
            let plan = self.stock_plan(tenant_id, lines).await?;
            let guard = self.ctx.lock(plan.iter().map(|l| l.product_id.clone())).await?;
            (plan, Some(guard))
        } else {
            (Vec::new(), None)
        };

        let mut tx = self.ctx.db().begin().await?;

        let order = match OrderRepository::insert(&mut tx, &new).await {
            Ok(order) => order,
            Err(e) if e.is_unique_on("client_uuid") => {
                tx.rollback().await?;
                return match registry.lookup(tenant_id, EntityKind::Order, client_uuid).await? {
                    Some(existing) => {
                        debug!(client_uuid, "Concurrent replay of order won the race");
                        Ok(Synced::AlreadySynced(existing))
                    }
                    None => Err(SyncError::Database(e.to_string())),
                };
            }
            Err(e) => return Err(e.into()),
        };

        let records = deduct(&mut tx, tenant, &order.order_number, &plan).await?;

        tx.commit().await?;
        drop(guard);

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            status = %order.status,
            lines = order.items.len(),
            "Order synced"
        );

        if deducts {
            self.ctx.facts().publish(completed_fact(&order));
            self.ctx.facts().publish_all(LedgerFact::low_stock(&records));
        }

        Ok(Synced::Created(order))
    }

    /// Validates the payload and resolves every id it names.
    async fn prepare(&self, tenant: &TenantContext, client_uuid: &str, payload: OrderPayload) -> SyncResult<NewOrder> {
        let tenant_id = tenant.tenant_id.as_str();
        validate_line_count(payload.items.len())?;

        let branch = self.ctx.require_branch(tenant_id, &payload.branch_id).await?;

        if let Some(customer_id) = payload.customer_id.as_deref() {
            let customer = self
                .ctx
                .db()
                .catalog()
                .get_customer(tenant_id, customer_id)
                .await?
                .ok_or_else(|| CoreError::not_found("Customer", customer_id))?;
            if customer.branch_id.as_deref().is_some_and(|b| b != branch.id) {
                return Err(CoreError::not_found("Customer", customer_id).into());
            }
        }

        let status = payload.status.unwrap_or_else(|| payload.ordering_type.default_status());
        if status == OrderStatus::Cancelled {
            return Err(ValidationError::InvalidFormat {
                field: "status".to_string(),
                reason: "an order cannot be synced as cancelled".to_string(),
            }
            .into());
        }

        let mut items = Vec::with_capacity(payload.items.len());
        for line in &payload.items {
            validate_quantity(line.quantity)?;
            let product = self.ctx.require_product(tenant_id, &line.product_id).await?;
            require_branch_product(&product, &branch.id)?;

            let price_cents = line.price_cents.unwrap_or(product.price_cents);
            validate_price_cents("price_cents", price_cents)?;

            items.push(NewOrderItem {
                product_id: product.id,
                quantity: line.quantity,
                price_cents,
                cost_price_cents: product.cost_cents,
            });
        }

        let subtotal_cents = match payload.subtotal_cents {
            Some(cents) => cents,
            None => checked_line_total(
                "subtotal_cents",
                items.iter().map(|i| (Money::from_cents(i.price_cents), i.quantity)),
            )?
            .cents(),
        };
        let tax_cents = payload.tax_cents.unwrap_or(0);
        validate_price_cents("subtotal_cents", subtotal_cents)?;
        validate_price_cents("tax_cents", tax_cents)?;

        let total_cents = match payload.total_cents {
            Some(cents) => cents,
            None => Money::from_cents(subtotal_cents)
                .checked_add(Money::from_cents(tax_cents))
                .map(|m| m.cents())
                .ok_or_else(|| ValidationError::OutOfRange {
                    field: "total_cents".to_string(),
                    min: 0,
                    max: MAX_PRICE_CENTS,
                })?,
        };
        validate_price_cents("total_cents", total_cents)?;

        Ok(NewOrder {
            tenant_id: tenant_id.to_string(),
            branch_id: branch.id,
            customer_id: payload.customer_id,
            cashier_id: payload.cashier_id.or_else(|| tenant.actor_id.clone()),
            client_uuid: client_uuid.to_string(),
            order_number: payload.order_number.filter(|n| !n.trim().is_empty()),
            status,
            ordering_type: payload.ordering_type,
            payment_method: payload.payment_method,
            subtotal_cents,
            tax_cents,
            total_cents,
            items,
        })
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Finalizes a pending order, deducting its stock exactly once.
    ///
    /// A second call on the completed order is a no-op.
    ///
    /// ## Errors
    /// * `CoreError::NotFound` - Unknown order for this tenant
    /// * `CoreError::InvalidTransition` - The order was cancelled
    /// * `CoreError::InsufficientStock` - Nothing is deducted
    pub async fn complete_pending_order(&self, tenant: &TenantContext, order_id: &str) -> SyncResult<Transitioned<Order>> {
        let tenant_id = tenant.tenant_id.as_str();
        let order = self.get(tenant_id, order_id).await?;

        if order.plan_complete()? == Transition::AlreadyApplied {
            debug!(order_id, "Order already completed");
            return Ok(Transitioned::unchanged(order));
        }

        let plan = self.stock_plan(tenant_id, order_lines(&order)).await?;
        let guard = self.ctx.lock(plan.iter().map(|l| l.product_id.clone())).await?;
        let mut tx = self.ctx.db().begin().await?;

        if !OrderRepository::mark_completed(&mut tx, tenant_id, order_id).await? {
            // Someone else completed or cancelled it since we read it.
            tx.rollback().await?;
            let current = self.get(tenant_id, order_id).await?;
            return match current.plan_complete()? {
                Transition::AlreadyApplied => Ok(Transitioned::unchanged(current)),
                Transition::Apply => Err(SyncError::LockTimeout(format!(
                    "order {} changed while completing",
                    current.order_number
                ))),
            };
        }

        let records = deduct(&mut tx, tenant, &order.order_number, &plan).await?;
        let completed = OrderRepository::load(&mut tx, tenant_id, order_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Order", order_id))?;

        tx.commit().await?;
        drop(guard);

        info!(order_id, order_number = %completed.order_number, "Pending order completed");

        self.ctx.facts().publish(completed_fact(&completed));
        self.ctx.facts().publish_all(LedgerFact::low_stock(&records));

        Ok(Transitioned::applied(completed))
    }

    // =========================================================================
    // Void
    // =========================================================================

    /// Cancels an order and puts back any stock it took.
    pub async fn void_order(&self, tenant: &TenantContext, order_id: &str) -> SyncResult<Transitioned<Order>> {
        let tenant_id = tenant.tenant_id.as_str();
        let order = self.get(tenant_id, order_id).await?;

        if order.plan_void() == Transition::AlreadyApplied {
            return Ok(Transitioned::unchanged(order));
        }

        let plan = self.stock_plan(tenant_id, order_lines(&order)).await?;
        let guard = self.ctx.lock(plan.iter().map(|l| l.product_id.clone())).await?;
        let mut tx = self.ctx.db().begin().await?;

        let Some(deducted) = OrderRepository::mark_cancelled(&mut tx, tenant_id, order_id).await? else {
            tx.rollback().await?;
            let current = self.get(tenant_id, order_id).await?;
            return Ok(Transitioned::unchanged(current));
        };

        if deducted {
            let notes = format!("Void of {}", order.order_number);
            for line in &plan {
                StockLedger::record(
                    &mut tx,
                    NewMovement::new(
                        tenant_id,
                        &line.product_id,
                        line.quantity,
                        MovementType::Return,
                        &order.order_number,
                    )
                    .notes(Some(&notes))
                    .actor(tenant.actor_id.as_deref()),
                )
                .await?;
            }
        }

        let voided = OrderRepository::load(&mut tx, tenant_id, order_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Order", order_id))?;

        tx.commit().await?;
        drop(guard);

        warn!(order_id, order_number = %voided.order_number, restocked = deducted, "Order voided");

        self.ctx.facts().publish(LedgerFact::OrderVoided {
            tenant_id: tenant_id.to_string(),
            order_id: voided.id.clone(),
            order_number: voided.order_number.clone(),
        });

        Ok(Transitioned::applied(voided))
    }

    /// Expands composite products into their components.
    async fn stock_plan<'a>(
        &self,
        tenant_id: &str,
        lines: impl IntoIterator<Item = (&'a str, i64)>,
    ) -> SyncResult<Vec<StockLine>> {
        let mut plan = Vec::new();
        for (product_id, quantity) in lines {
            let components = self.ctx.db().products().components(tenant_id, product_id).await?;
            if components.is_empty() {
                plan.push(StockLine {
                    product_id: product_id.to_string(),
                    quantity,
                });
                continue;
            }

            debug!(product_id, components = components.len(), "Expanding composite line");
            for component in components {
                let quantity = component
                    .quantity
                    .checked_mul(quantity)
                    .ok_or_else(|| ValidationError::OutOfRange {
                        field: "quantity".to_string(),
                        min: 1,
                        max: i64::MAX / component.quantity,
                    })?;
                plan.push(StockLine {
                    product_id: component.component_id,
                    quantity,
                });
            }
        }
        Ok(plan)
    }

    pub async fn get(&self, tenant_id: &str, order_id: &str) -> SyncResult<Order> {
        self.ctx
            .db()
            .orders()
            .get(tenant_id, order_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Order", order_id).into())
    }
}

/// Units of one stocked product that a sale takes off the shelf.
#[derive(Debug, Clone)]
struct StockLine {
    product_id: String,
    quantity: i64,
}

fn order_lines(order: &Order) -> impl Iterator<Item = (&str, i64)> + '_ {
    order.items.iter().map(|i| (i.product_id.as_str(), i.quantity))
}

/// One `sale` movement per stock line. The first shortfall aborts the whole call.
async fn deduct(
    conn: &mut sqlx::SqliteConnection,
    tenant: &TenantContext,
    order_number: &str,
    plan: &[StockLine],
) -> SyncResult<Vec<MovementRecord>> {
    let mut records = Vec::with_capacity(plan.len());
    for line in plan {
        let record = StockLedger::record(
            &mut *conn,
            NewMovement::new(
                &tenant.tenant_id,
                &line.product_id,
                -line.quantity,
                MovementType::Sale,
                order_number,
            )
            .actor(tenant.actor_id.as_deref()),
        )
        .await?;
        records.push(record);
    }
    Ok(records)
}

fn completed_fact(order: &Order) -> LedgerFact {
    LedgerFact::OrderCompleted {
        tenant_id: order.tenant_id.clone(),
        order_id: order.id.clone(),
        order_number: order.order_number.clone(),
        total_cents: order.total_cents,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::fixtures::{self, TENANT};
    use crate::protocol::{ComponentLine, ComponentsPayload, OrderLine};
    use stockline_core::OrderingType;

    const UUID_A: &str = "6f1d2c3b-0000-4000-8000-00000000000a";
    const UUID_B: &str = "6f1d2c3b-0000-4000-8000-00000000000b";

    fn payload(branch_id: &str, product_id: &str, quantity: i64) -> OrderPayload {
        OrderPayload {
            branch_id: branch_id.to_string(),
            items: vec![OrderLine {
                product_id: product_id.to_string(),
                quantity,
                price_cents: None,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_completed_order_deducts_stock() {
        let ctx = fixtures::context().await;
        let main = fixtures::branch(&ctx, "Main").await;
        let mug = fixtures::product(&ctx, &main, "MUG", 10, 300).await;
        let handler = OrderHandler::new(ctx.clone());

        let synced = handler
            .sync_order(&fixtures::tenant(), UUID_A, payload(&main.id, &mug.id, 4))
            .await
            .unwrap();

        let Synced::Created(order) = synced else {
            panic!("expected a new order");
        };
        assert_eq!(order.order_number, "ORD-000001");
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.stock_deducted);
        assert_eq!(order.total_cents, 4 * 600);
        assert_eq!(order.items[0].cost_price_cents, 300);
        assert_eq!(fixtures::stock(&ctx, &mug.id).await, 6);

        let movements = ctx.db().ledger().by_reference(TENANT, "ORD-000001").await.unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].quantity_change, -4);
        assert_eq!(movements[0].actor_id.as_deref(), Some("clerk-1"));
    }

    #[tokio::test]
    async fn test_replay_returns_existing_order() {
        let ctx = fixtures::context().await;
        let main = fixtures::branch(&ctx, "Main").await;
        let mug = fixtures::product(&ctx, &main, "MUG", 10, 300).await;
        let handler = OrderHandler::new(ctx.clone());
        let tenant = fixtures::tenant();

        let first = handler.sync_order(&tenant, UUID_A, payload(&main.id, &mug.id, 2)).await.unwrap();
        let second = handler.sync_order(&tenant, UUID_A, payload(&main.id, &mug.id, 2)).await.unwrap();

        assert!(first.is_created());
        let Synced::AlreadySynced(record) = second else {
            panic!("replay must not create a second order");
        };
        assert_eq!(record.reference, "ORD-000001");
        assert_eq!(fixtures::stock(&ctx, &mug.id).await, 8);
    }

    #[tokio::test]
    async fn test_oversell_writes_nothing() {
        let ctx = fixtures::context().await;
        let main = fixtures::branch(&ctx, "Main").await;
        let mug = fixtures::product(&ctx, &main, "MUG", 1, 300).await;
        let handler = OrderHandler::new(ctx.clone());

        let err = handler
            .sync_order(&fixtures::tenant(), UUID_A, payload(&main.id, &mug.id, 2))
            .await
            .unwrap_err();

        assert!(err.is_business_rule());
        assert_eq!(fixtures::stock(&ctx, &mug.id).await, 1);
        let replay = ctx.db().idempotency().lookup(TENANT, EntityKind::Order, UUID_A).await.unwrap();
        assert!(replay.is_none(), "rejected order must not be recorded");
    }

    #[tokio::test]
    async fn test_product_from_other_branch_rejected() {
        let ctx = fixtures::context().await;
        let main = fixtures::branch(&ctx, "Main").await;
        let annex = fixtures::branch(&ctx, "Annex").await;
        let mug = fixtures::product(&ctx, &annex, "MUG", 5, 300).await;

        let err = OrderHandler::new(ctx.clone())
            .sync_order(&fixtures::tenant(), UUID_A, payload(&main.id, &mug.id, 1))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(fixtures::stock(&ctx, &mug.id).await, 5);
    }

    #[tokio::test]
    async fn test_kiosk_order_completes_once() {
        let ctx = fixtures::context().await;
        let main = fixtures::branch(&ctx, "Main").await;
        let mug = fixtures::product(&ctx, &main, "MUG", 10, 300).await;
        let handler = OrderHandler::new(ctx.clone());
        let tenant = fixtures::tenant();

        let mut kiosk = payload(&main.id, &mug.id, 3);
        kiosk.ordering_type = OrderingType::Kiosk;
        let Synced::Created(order) = handler.sync_order(&tenant, UUID_B, kiosk).await.unwrap() else {
            panic!("expected a new order");
        };
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(fixtures::stock(&ctx, &mug.id).await, 10);

        let first = handler.complete_pending_order(&tenant, &order.id).await.unwrap();
        assert!(first.is_applied());
        assert_eq!(first.entity.status, OrderStatus::Completed);
        assert_eq!(fixtures::stock(&ctx, &mug.id).await, 7);

        let second = handler.complete_pending_order(&tenant, &order.id).await.unwrap();
        assert!(!second.is_applied());
        assert_eq!(fixtures::stock(&ctx, &mug.id).await, 7);
    }

    #[tokio::test]
    async fn test_online_order_deducts_stock() {
        let ctx = fixtures::context().await;
        let main = fixtures::branch(&ctx, "Main").await;
        let mug = fixtures::product(&ctx, &main, "MUG", 10, 300).await;

        let mut online = payload(&main.id, &mug.id, 2);
        online.ordering_type = OrderingType::Online;
        let Synced::Created(order) = OrderHandler::new(ctx.clone())
            .sync_order(&fixtures::tenant(), UUID_A, online)
            .await
            .unwrap()
        else {
            panic!("expected a new order");
        };

        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.stock_deducted);
        assert_eq!(fixtures::stock(&ctx, &mug.id).await, 8);
    }

    #[tokio::test]
    async fn test_void_restocks_completed_order() {
        let ctx = fixtures::context().await;
        let main = fixtures::branch(&ctx, "Main").await;
        let mug = fixtures::product(&ctx, &main, "MUG", 10, 300).await;
        let handler = OrderHandler::new(ctx.clone());
        let tenant = fixtures::tenant();

        let Synced::Created(order) = handler.sync_order(&tenant, UUID_A, payload(&main.id, &mug.id, 4)).await.unwrap()
        else {
            panic!("expected a new order");
        };

        let voided = handler.void_order(&tenant, &order.id).await.unwrap();
        assert!(voided.is_applied());
        assert_eq!(voided.entity.status, OrderStatus::Cancelled);
        assert_eq!(fixtures::stock(&ctx, &mug.id).await, 10);

        let again = handler.void_order(&tenant, &order.id).await.unwrap();
        assert!(!again.is_applied());
        assert_eq!(fixtures::stock(&ctx, &mug.id).await, 10);

        let err = handler.complete_pending_order(&tenant, &order.id).await.unwrap_err();
        assert!(err.is_business_rule());
    }

    #[tokio::test]
    async fn test_composite_sale_moves_components() {
        let ctx = fixtures::context().await;
        let main = fixtures::branch(&ctx, "Main").await;
        let bundle = fixtures::product(&ctx, &main, "GIFT-BOX", 0, 0).await;
        let mug = fixtures::product(&ctx, &main, "MUG", 10, 300).await;
        let tea = fixtures::product(&ctx, &main, "TEA", 10, 100).await;
        crate::handlers::StockHandler::new(ctx.clone())
            .set_components(
                &fixtures::tenant(),
                &bundle.id,
                ComponentsPayload {
                    components: vec![
                        ComponentLine {
                            product_id: mug.id.clone(),
                            quantity: 1,
                        },
                        ComponentLine {
                            product_id: tea.id.clone(),
                            quantity: 3,
                        },
                    ],
                },
            )
            .await
            .unwrap();
        let handler = OrderHandler::new(ctx.clone());
        let tenant = fixtures::tenant();

        let Synced::Created(order) = handler.sync_order(&tenant, UUID_A, payload(&main.id, &bundle.id, 2)).await.unwrap()
        else {
            panic!("expected a new order");
        };
        assert_eq!(order.items.len(), 1);
        assert_eq!(fixtures::stock(&ctx, &bundle.id).await, 0);
        assert_eq!(fixtures::stock(&ctx, &mug.id).await, 8);
        assert_eq!(fixtures::stock(&ctx, &tea.id).await, 4);
        assert!(ctx.db().ledger().history(TENANT, &bundle.id).await.unwrap().is_empty());

        // Three more bundles need nine tea; only four are left.
        let err = handler
            .sync_order(&tenant, UUID_B, payload(&main.id, &bundle.id, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Domain(CoreError::InsufficientStock { available: 4, requested: 9, .. })));
        assert_eq!(fixtures::stock(&ctx, &mug.id).await, 8);

        handler.void_order(&tenant, &order.id).await.unwrap();
        assert_eq!(fixtures::stock(&ctx, &mug.id).await, 10);
        assert_eq!(fixtures::stock(&ctx, &tea.id).await, 10);
    }

    #[tokio::test]
    async fn test_oversized_totals_rejected() {
        let ctx = fixtures::context().await;
        let main = fixtures::branch(&ctx, "Main").await;
        let mug = fixtures::product(&ctx, &main, "MUG", 10, 300).await;
        let handler = OrderHandler::new(ctx.clone());
        let tenant = fixtures::tenant();

        let mut taxed = payload(&main.id, &mug.id, 1);
        taxed.tax_cents = Some(i64::MAX);
        let err = handler.sync_order(&tenant, UUID_A, taxed).await.unwrap_err();
        assert!(err.is_validation());

        let mut pricey = payload(&main.id, &mug.id, 1_000_000);
        pricey.items[0].price_cents = Some(i64::MAX / 2);
        let err = handler.sync_order(&tenant, UUID_B, pricey).await.unwrap_err();
        assert!(err.is_validation());

        assert_eq!(fixtures::stock(&ctx, &mug.id).await, 10);
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let ctx = fixtures::context().await;
        let err = OrderHandler::new(ctx)
            .complete_pending_order(&fixtures::tenant(), "missing")
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
