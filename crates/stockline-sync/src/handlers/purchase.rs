//! # Purchase Receiving Handler
//!
//! Creates purchase orders and books their receipt into the ledger.
//!
//! ```text
//!  create_po ──► ordered ──receive_purchase_order──► received
//!                   │
//!                   └── cancel_purchase_order ──► cancelled
//! ```
//!
//! Receiving is all-or-nothing across lines and happens once. A second
//! receive is rejected with `AlreadyReceived` rather than treated as a
//! no-op, because received quantities are not keyed per line.
//!
//! The unpaid part of a PO is owed to the supplier from the moment it is
//! created: `create_po` books it as a `purchase` credit entry in the same
//! transaction, `cancel_purchase_order` books it back, and
//! `record_supplier_payment` pays it down.

use tracing::{debug, info, warn};

use super::{require_branch_product, HandlerContext, Synced, Transitioned, REFERENCE_ATTEMPTS};
use crate::error::{SyncError, SyncResult};
use crate::facts::LedgerFact;
use crate::protocol::{CreatePoPayload, ReceivePoPayload, ReceivedLine, SupplierPaymentPayload};
use stockline_core::costing::weighted_average_cost;
use stockline_core::reference::purchase_order_reference;
use stockline_core::validation::{
    validate_line_count, validate_notes, validate_price_cents, validate_quantity, validate_uuid,
};
use stockline_core::{
    CoreError, CreditTransactionType, EntityKind, Money, MovementType, PurchaseOrder, PurchaseOrderItem,
    PurchaseOrderStatus, SupplierCreditTransaction, TenantContext, Transition, ValidationError,
};
use stockline_db::{
    CatalogRepository, NewMovement, NewPurchaseOrder, NewPurchaseOrderItem, NewSupplierCredit, ProductRepository,
    PurchaseOrderRepository, StockLedger,
};

#[derive(Debug, Clone)]
pub struct PurchaseHandler {
    ctx: HandlerContext,
}

/// What actually arrives on one PO line.
#[derive(Debug, Clone)]
struct Receipt<'a> {
    item: &'a PurchaseOrderItem,
    quantity: i64,
    unit_cost_cents: i64,
    batch_id: Option<&'a str>,
}

impl PurchaseHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        PurchaseHandler { ctx }
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Creates an `ordered` PO once per `client_uuid`.
    ///
    /// Line unit costs default to the product's current cost. When less
    /// than the total is paid, the supplier's outstanding balance grows by
    /// the difference.
    pub async fn create_po(
        &self,
        tenant: &TenantContext,
        client_uuid: &str,
        payload: CreatePoPayload,
    ) -> SyncResult<Synced<PurchaseOrder>> {
        let tenant_id = tenant.tenant_id.as_str();
        validate_uuid("uuid", client_uuid)?;

        let registry = self.ctx.db().idempotency();
        if let Some(existing) = registry.lookup(tenant_id, EntityKind::PurchaseOrder, client_uuid).await? {
            debug!(client_uuid, reference = %existing.reference, "Purchase order already synced");
            return Ok(Synced::AlreadySynced(existing));
        }

        validate_line_count(payload.items.len())?;
        validate_notes(payload.notes.as_deref())?;
        validate_price_cents("amount_paid_cents", payload.amount_paid_cents)?;

        let branch = self.ctx.require_branch(tenant_id, &payload.branch_id).await?;
        let supplier = self
            .ctx
            .db()
            .catalog()
            .get_supplier(tenant_id, &payload.supplier_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Supplier", &payload.supplier_id))?;

        let mut items = Vec::with_capacity(payload.items.len());
        for line in &payload.items {
            validate_quantity(line.quantity)?;
            let product = self.ctx.require_product(tenant_id, &line.product_id).await?;
            require_branch_product(&product, &branch.id)?;

            let unit_cost_cents = line.unit_cost_cents.unwrap_or(product.cost_cents);
            validate_price_cents("unit_cost_cents", unit_cost_cents)?;

            items.push(NewPurchaseOrderItem {
                product_id: product.id,
                quantity: line.quantity,
                unit_cost_cents,
            });
        }

        let mut new = NewPurchaseOrder {
            tenant_id: tenant_id.to_string(),
            client_uuid: Some(client_uuid.to_string()),
            reference_id: String::new(),
            branch_id: branch.id,
            supplier_id: supplier.id,
            status: PurchaseOrderStatus::Ordered,
            amount_paid_cents: payload.amount_paid_cents,
            payment_method: payload.payment_method,
            expected_date: payload.expected_date,
            notes: payload.notes,
            created_by: tenant.actor_id.clone(),
            items,
        };
        new.total_cost_cents()?;

        for _ in 0..REFERENCE_ATTEMPTS {
            new.reference_id = purchase_order_reference();

            let mut tx = self.ctx.db().begin().await?;
            match PurchaseOrderRepository::insert(&mut tx, &new).await {
                Ok(po) => {
                    let due = po.balance_due();
                    if due.cents() > 0 {
                        CatalogRepository::record_supplier_credit(
                            &mut tx,
                            &credit_entry(tenant, &po, due.cents(), CreditTransactionType::Purchase),
                        )
                        .await?;
                    }
                    tx.commit().await?;
                    info!(
                        purchase_order_id = %po.id,
                        reference = %po.reference_id,
                        total_cost = %po.total_cost(),
                        on_credit = %due,
                        "Purchase order created"
                    );
                    return Ok(Synced::Created(po));
                }
                Err(e) if e.is_unique_on("client_uuid") => {
                    tx.rollback().await?;
                    return match registry.lookup(tenant_id, EntityKind::PurchaseOrder, client_uuid).await? {
                        Some(existing) => Ok(Synced::AlreadySynced(existing)),
                        None => Err(SyncError::Database(e.to_string())),
                    };
                }
                Err(e) if e.is_unique_on("reference_id") => {
                    tx.rollback().await?;
                    warn!(reference = %new.reference_id, "Generated PO reference collided, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SyncError::Internal("could not allocate a unique purchase order reference".into()))
    }

    // =========================================================================
    // Receive
    // =========================================================================

    /// Books every line into stock and reprices each product by weighted
    /// average cost.
    ///
    /// Lines named in `received_items` use the given quantity and unit cost;
    /// the rest arrive as ordered. A line received as 0 writes no movement.
    ///
    /// ## Errors
    /// * `CoreError::AlreadyReceived` - Received before; nothing changes
    /// * `CoreError::InvalidTransition` - Draft or cancelled PO
    /// * Validation - An override names no line of this PO
    pub async fn receive_purchase_order(
        &self,
        tenant: &TenantContext,
        po_id: &str,
        payload: ReceivePoPayload,
    ) -> SyncResult<PurchaseOrder> {
        let tenant_id = tenant.tenant_id.as_str();
        let po = self.get(tenant_id, po_id).await?;
        po.plan_receive()?;

        let receipts = plan_receipts(&po, &payload.received_items)?;

        let guard = self.ctx.lock(
            receipts
                .iter()
                .filter(|r| r.quantity > 0)
                .map(|r| r.item.product_id.clone()),
        )
        .await?;
        let mut tx = self.ctx.db().begin().await?;

        if !PurchaseOrderRepository::set_status(
            &mut tx,
            tenant_id,
            po_id,
            PurchaseOrderStatus::Ordered,
            PurchaseOrderStatus::Received,
        )
        .await?
        {
            tx.rollback().await?;
            let current = self.get(tenant_id, po_id).await?;
            current.plan_receive()?;
            return Err(SyncError::LockTimeout(format!(
                "purchase order {} changed while receiving",
                current.reference_id
            )));
        }

        let mut records = Vec::new();
        for receipt in &receipts {
            PurchaseOrderRepository::record_receipt(
                &mut tx,
                &receipt.item.id,
                receipt.quantity,
                receipt.unit_cost_cents,
            )
            .await?;

            if receipt.quantity == 0 {
                continue;
            }

            let product = ProductRepository::load(&mut tx, tenant_id, &receipt.item.product_id)
                .await?
                .ok_or_else(|| CoreError::not_found("Product", &receipt.item.product_id))?;

            let record = StockLedger::record(
                &mut tx,
                NewMovement::new(
                    tenant_id,
                    &product.id,
                    receipt.quantity,
                    MovementType::Receive,
                    &po.reference_id,
                )
                .actor(tenant.actor_id.as_deref())
                .batch(receipt.batch_id),
            )
            .await?;

            let new_cost = weighted_average_cost(
                record.previous_balance,
                product.cost(),
                receipt.quantity,
                Money::from_cents(receipt.unit_cost_cents),
            );
            if new_cost.cents() != product.cost_cents {
                debug!(
                    product_id = %product.id,
                    old_cost = %product.cost(),
                    new_cost = %new_cost,
                    "Weighted average cost updated"
                );
                ProductRepository::update_cost(&mut tx, tenant_id, &product.id, new_cost.cents()).await?;
            }
            records.push(record);
        }

        let received = PurchaseOrderRepository::load(&mut tx, tenant_id, po_id)
            .await?
            .ok_or_else(|| CoreError::not_found("PurchaseOrder", po_id))?;
        tx.commit().await?;
        drop(guard);

        info!(
            purchase_order_id = %received.id,
            reference = %received.reference_id,
            lines = records.len(),
            "Purchase order received"
        );

        self.ctx.facts().publish(LedgerFact::PurchaseOrderReceived {
            tenant_id: tenant_id.to_string(),
            purchase_order_id: received.id.clone(),
            reference: received.reference_id.clone(),
            total_cost_cents: received.total_cost_cents,
        });

        Ok(received)
    }

    // =========================================================================
    // Cancel
    // =========================================================================

    /// Legal from `draft` or `ordered`; idempotent on `cancelled`. Any
    /// unpaid amount is taken back off the supplier's balance.
    pub async fn cancel_purchase_order(
        &self,
        tenant: &TenantContext,
        po_id: &str,
    ) -> SyncResult<Transitioned<PurchaseOrder>> {
        let tenant_id = tenant.tenant_id.as_str();
        let po = self.get(tenant_id, po_id).await?;
        if po.plan_cancel()? == Transition::AlreadyApplied {
            return Ok(Transitioned::unchanged(po));
        }

        let mut tx = self.ctx.db().begin().await?;
        if !PurchaseOrderRepository::set_status(&mut tx, tenant_id, po_id, po.status, PurchaseOrderStatus::Cancelled)
            .await?
        {
            tx.rollback().await?;
            let current = self.get(tenant_id, po_id).await?;
            return match current.plan_cancel()? {
                Transition::AlreadyApplied => Ok(Transitioned::unchanged(current)),
                Transition::Apply => Err(SyncError::LockTimeout(format!(
                    "purchase order {} changed while cancelling",
                    current.reference_id
                ))),
            };
        }

        let due = po.balance_due();
        if due.cents() > 0 {
            CatalogRepository::record_supplier_credit(
                &mut tx,
                &credit_entry(tenant, &po, -due.cents(), CreditTransactionType::Adjustment),
            )
            .await?;
        }

        let cancelled = PurchaseOrderRepository::load(&mut tx, tenant_id, po_id)
            .await?
            .ok_or_else(|| CoreError::not_found("PurchaseOrder", po_id))?;
        tx.commit().await?;

        info!(purchase_order_id = %cancelled.id, reference = %cancelled.reference_id, "Purchase order cancelled");
        Ok(Transitioned::applied(cancelled))
    }

    // =========================================================================
    // Supplier credit
    // =========================================================================

    /// Pays down what the tenant owes a supplier.
    ///
    /// The balance may end below zero; that is credit held with the supplier.
    pub async fn record_supplier_payment(
        &self,
        tenant: &TenantContext,
        supplier_id: &str,
        payload: SupplierPaymentPayload,
    ) -> SyncResult<SupplierCreditTransaction> {
        let tenant_id = tenant.tenant_id.as_str();
        if payload.amount_cents <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "amount_cents".to_string(),
            }
            .into());
        }
        validate_price_cents("amount_cents", payload.amount_cents)?;
        validate_notes(payload.notes.as_deref())?;

        let mut tx = self.ctx.db().begin().await?;
        let (entry, balance) = CatalogRepository::record_supplier_credit(
            &mut tx,
            &NewSupplierCredit {
                tenant_id: tenant_id.to_string(),
                supplier_id: supplier_id.to_string(),
                amount_cents: -payload.amount_cents,
                transaction_type: CreditTransactionType::Payment,
                reference: None,
                notes: payload.notes,
                actor_id: tenant.actor_id.clone(),
            },
        )
        .await?;
        tx.commit().await?;

        info!(
            supplier_id,
            paid = %Money::from_cents(payload.amount_cents),
            outstanding = %Money::from_cents(balance),
            "Supplier payment recorded"
        );
        Ok(entry)
    }

    pub async fn get(&self, tenant_id: &str, po_id: &str) -> SyncResult<PurchaseOrder> {
        self.ctx
            .db()
            .purchase_orders()
            .get(tenant_id, po_id)
            .await?
            .ok_or_else(|| CoreError::not_found("PurchaseOrder", po_id).into())
    }
}

/// Credit entry tied to a PO, referenced as `PO #<reference>`.
fn credit_entry(
    tenant: &TenantContext,
    po: &PurchaseOrder,
    amount_cents: i64,
    transaction_type: CreditTransactionType,
) -> NewSupplierCredit {
    NewSupplierCredit {
        tenant_id: po.tenant_id.clone(),
        supplier_id: po.supplier_id.clone(),
        amount_cents,
        transaction_type,
        reference: Some(format!("PO #{}", po.reference_id)),
        notes: None,
        actor_id: tenant.actor_id.clone(),
    }
}

/// Applies the overrides to the ordered lines.
fn plan_receipts<'a>(po: &'a PurchaseOrder, overrides: &'a [ReceivedLine]) -> SyncResult<Vec<Receipt<'a>>> {
    let mut receipts: Vec<Receipt<'a>> = po
        .items
        .iter()
        .map(|item| Receipt {
            item,
            quantity: item.quantity,
            unit_cost_cents: item.unit_cost_cents,
            batch_id: None,
        })
        .collect();

    for line in overrides {
        let position = receipts.iter().position(|r| match (&line.item_id, &line.product_id) {
            (Some(item_id), _) => &r.item.id == item_id,
            (None, Some(product_id)) => &r.item.product_id == product_id,
            (None, None) => false,
        });

        let Some(position) = position else {
            let named = line.item_id.as_deref().or(line.product_id.as_deref()).unwrap_or("(none)");
            return Err(ValidationError::InvalidFormat {
                field: "received_items".to_string(),
                reason: format!("{named} is not a line of {}", po.reference_id),
            }
            .into());
        };

        let receipt = &mut receipts[position];
        if let Some(quantity) = line.quantity {
            if quantity != 0 {
                validate_quantity(quantity)?;
            }
            receipt.quantity = quantity;
        }
        if let Some(cost) = line.unit_cost_cents {
            validate_price_cents("unit_cost_cents", cost)?;
            receipt.unit_cost_cents = cost;
        }
        if let Some(batch_id) = line.batch_id.as_deref().filter(|b| !b.trim().is_empty()) {
            receipt.batch_id = Some(batch_id);
        }
    }

    Ok(receipts)
}
