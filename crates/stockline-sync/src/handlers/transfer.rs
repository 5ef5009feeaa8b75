//! # Transfer State Machine
//!
//! Moves stock between two branches of one tenant.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  request ──► requested ──approve──► approved ──ship──► shipped         │
//! │                  │                     │                  │             │
//! │                  └────── cancel ───────┤               receive          │
//! │                                        ▼                  ▼             │
//! │                                    cancelled          completed        │
//! │                                                                         │
//! │  ship:    transfer_out −qty per line at the source      (all or none)  │
//! │  receive: transfer_in  +qty per line at the destination (all or none)  │
//! │           destination product resolved by SKU, created if missing      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every transition first compare-and-sets the status. Calling a transition
//! the transfer is already at (or past) returns the transfer unchanged; any
//! other illegal call is `InvalidTransition` and writes nothing.

use tracing::{debug, info, warn};

use super::{require_branch_product, HandlerContext, Synced, Transitioned, REFERENCE_ATTEMPTS};
use crate::error::{SyncError, SyncResult};
use crate::facts::LedgerFact;
use crate::protocol::CreateTransferPayload;
use stockline_core::costing::weighted_average_cost;
use stockline_core::reference::transfer_reference;
use stockline_core::validation::{
    validate_branch_pair, validate_line_count, validate_notes, validate_price_cents, validate_quantity, validate_uuid,
};
use stockline_core::{
    CoreError, Money, MovementType, Product, StockTransfer, TenantContext, Transition, TransferStatus,
    ValidationError,
};
use stockline_db::{
    MovementRecord, NewMovement, NewProduct, NewTransfer, NewTransferItem, ProductRepository, StockLedger,
    TransferRepository,
};

#[derive(Debug, Clone)]
pub struct TransferHandler {
    ctx: HandlerContext,
}

impl TransferHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        TransferHandler { ctx }
    }

    // =========================================================================
    // Request
    // =========================================================================

    /// Creates a transfer in `requested`. No stock moves.
    ///
    /// `client_uuid` is the envelope id for offline requests and `None` for
    /// online ones. A transfer already carrying either the uuid or the
    /// payload's `reference_id` is returned instead of a new one.
    pub async fn request(
        &self,
        tenant: &TenantContext,
        client_uuid: Option<&str>,
        payload: CreateTransferPayload,
    ) -> SyncResult<Synced<StockTransfer>> {
        let tenant_id = tenant.tenant_id.as_str();
        if let Some(uuid) = client_uuid {
            validate_uuid("uuid", uuid)?;
        }
        let reference_id = payload.reference_id.as_deref().map(str::trim).filter(|r| !r.is_empty());

        let registry = self.ctx.db().idempotency();
        if let Some(existing) = registry.lookup_transfer(tenant_id, client_uuid, reference_id).await? {
            debug!(reference = %existing.reference, "Transfer already synced");
            return Ok(Synced::AlreadySynced(existing));
        }

        validate_branch_pair(&payload.source_branch_id, &payload.destination_branch_id)?;
        validate_line_count(payload.items.len())?;
        validate_notes(payload.notes.as_deref())?;

        let source = self.ctx.require_branch(tenant_id, &payload.source_branch_id).await?;
        let destination = self.ctx.require_branch(tenant_id, &payload.destination_branch_id).await?;

        let mut items = Vec::with_capacity(payload.items.len());
        for line in &payload.items {
            validate_quantity(line.quantity)?;
            if let Some(price) = line.transfer_price_cents {
                validate_price_cents("transfer_price_cents", price)?;
            }
            let product = self.ctx.require_product(tenant_id, &line.product_id).await?;
            require_branch_product(&product, &source.id)?;

            items.push(NewTransferItem {
                product_id: product.id,
                quantity: line.quantity,
                transfer_price_cents: line.transfer_price_cents,
            });
        }

        let mut new = NewTransfer {
            tenant_id: tenant_id.to_string(),
            client_uuid: client_uuid.map(str::to_string),
            reference_id: String::new(),
            source_branch_id: source.id,
            destination_branch_id: destination.id,
            notes: payload.notes.clone(),
            created_by: tenant.actor_id.clone(),
            items,
        };

        for _ in 0..REFERENCE_ATTEMPTS {
            new.reference_id = reference_id.map_or_else(transfer_reference, str::to_string);

            let mut tx = self.ctx.db().begin().await?;
            match TransferRepository::insert(&mut tx, &new).await {
                Ok(transfer) => {
                    tx.commit().await?;
                    info!(
                        transfer_id = %transfer.id,
                        reference = %transfer.reference_id,
                        lines = transfer.items.len(),
                        "Transfer requested"
                    );
                    return Ok(Synced::Created(transfer));
                }
                Err(e) if e.is_unique_on("client_uuid") || (e.is_unique_on("reference_id") && reference_id.is_some()) => {
                    tx.rollback().await?;
                    return match registry.lookup_transfer(tenant_id, client_uuid, reference_id).await? {
                        Some(existing) => Ok(Synced::AlreadySynced(existing)),
                        // The reference belongs to another tenant.
                        None => Err(ValidationError::InvalidFormat {
                            field: "reference_id".to_string(),
                            reason: "already in use".to_string(),
                        }
                        .into()),
                    };
                }
                Err(e) if e.is_unique_on("reference_id") => {
                    tx.rollback().await?;
                    warn!(reference = %new.reference_id, "Generated transfer reference collided, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SyncError::Internal("could not allocate a unique transfer reference".into()))
    }

    // =========================================================================
    // Transitions without stock
    // =========================================================================

    pub async fn approve(&self, tenant: &TenantContext, transfer_id: &str) -> SyncResult<Transitioned<StockTransfer>> {
        self.set_status(tenant, transfer_id, TransferStatus::Approved).await
    }

    /// Legal from `requested` or `approved`.
    pub async fn cancel(&self, tenant: &TenantContext, transfer_id: &str) -> SyncResult<Transitioned<StockTransfer>> {
        self.set_status(tenant, transfer_id, TransferStatus::Cancelled).await
    }

    async fn set_status(
        &self,
        tenant: &TenantContext,
        transfer_id: &str,
        target: TransferStatus,
    ) -> SyncResult<Transitioned<StockTransfer>> {
        let tenant_id = tenant.tenant_id.as_str();
        let transfer = self.get(tenant_id, transfer_id).await?;
        if transfer.plan(target)? == Transition::AlreadyApplied {
            return Ok(Transitioned::unchanged(transfer));
        }

        let mut tx = self.ctx.db().begin().await?;
        if !TransferRepository::set_status(&mut tx, tenant_id, transfer_id, &[transfer.status], target).await? {
            tx.rollback().await?;
            return self.raced(tenant_id, transfer_id, target).await;
        }
        let updated = load(&mut tx, tenant_id, transfer_id).await?;
        tx.commit().await?;

        info!(transfer_id, reference = %updated.reference_id, status = %target, "Transfer status changed");
        Ok(Transitioned::applied(updated))
    }

    // =========================================================================
    // Ship
    // =========================================================================

    /// Takes every line's quantity out of the source branch, or none of it.
    ///
    /// ## Errors
    /// * `CoreError::InvalidTransition` - Not `approved`
    /// * `CoreError::InsufficientStock` - First short line; nothing deducted
    /// * `SyncError::LockTimeout` - Source product locks were busy
    pub async fn ship(&self, tenant: &TenantContext, transfer_id: &str) -> SyncResult<Transitioned<StockTransfer>> {
        let tenant_id = tenant.tenant_id.as_str();
        let transfer = self.get(tenant_id, transfer_id).await?;
        if transfer.plan(TransferStatus::Shipped)? == Transition::AlreadyApplied {
            return Ok(Transitioned::unchanged(transfer));
        }

        let destination = self.ctx.require_branch(tenant_id, &transfer.destination_branch_id).await?;
        let notes = format!("Shipped to {}", destination.name);

        let guard = self.ctx.lock(transfer.items.iter().map(|i| i.product_id.clone())).await?;
        let mut tx = self.ctx.db().begin().await?;

        if !TransferRepository::set_status(
            &mut tx,
            tenant_id,
            transfer_id,
            &[TransferStatus::Approved],
            TransferStatus::Shipped,
        )
        .await?
        {
            tx.rollback().await?;
            return self.raced(tenant_id, transfer_id, TransferStatus::Shipped).await;
        }

        let mut records: Vec<MovementRecord> = Vec::with_capacity(transfer.items.len());
        for item in &transfer.items {
            let record = StockLedger::record(
                &mut tx,
                NewMovement::new(
                    tenant_id,
                    &item.product_id,
                    -item.quantity,
                    MovementType::TransferOut,
                    &transfer.reference_id,
                )
                .notes(Some(&notes))
                .actor(tenant.actor_id.as_deref()),
            )
            .await?;
            records.push(record);
        }

        let shipped = load(&mut tx, tenant_id, transfer_id).await?;
        tx.commit().await?;
        drop(guard);

        info!(transfer_id, reference = %shipped.reference_id, lines = records.len(), "Transfer shipped");

        self.ctx.facts().publish(LedgerFact::TransferShipped {
            tenant_id: tenant_id.to_string(),
            transfer_id: shipped.id.clone(),
            reference: shipped.reference_id.clone(),
        });
        self.ctx.facts().publish_all(LedgerFact::low_stock(&records));

        Ok(Transitioned::applied(shipped))
    }

    // =========================================================================
    // Receive
    // =========================================================================

    /// Books every line into the destination branch and completes the transfer.
    ///
    /// Each line resolves its destination product by SKU within the
    /// destination branch, creating a copy of the source product when the
    /// branch does not stock it yet. The incoming unit cost (transfer price,
    /// else source cost) is blended into the destination cost by weighted
    /// average.
    pub async fn receive(&self, tenant: &TenantContext, transfer_id: &str) -> SyncResult<Transitioned<StockTransfer>> {
        let tenant_id = tenant.tenant_id.as_str();
        let transfer = self.get(tenant_id, transfer_id).await?;
        if transfer.plan(TransferStatus::Completed)? == Transition::AlreadyApplied {
            return Ok(Transitioned::unchanged(transfer));
        }

        let source = self.ctx.require_branch(tenant_id, &transfer.source_branch_id).await?;
        let dest_branch = transfer.destination_branch_id.as_str();
        let notes = format!("Received from {}", source.name);

        // Source products give the SKU and the template for a missing copy.
        let mut source_products: Vec<Product> = Vec::with_capacity(transfer.items.len());
        let mut keys = Vec::with_capacity(transfer.items.len() * 2);
        for item in &transfer.items {
            let product = self.ctx.require_product(tenant_id, &item.product_id).await?;
            keys.push(format!("{dest_branch}:{}", product.sku));
            if let Some(existing) = self.ctx.db().products().find_by_sku(tenant_id, dest_branch, &product.sku).await? {
                keys.push(existing.id);
            }
            source_products.push(product);
        }

        let guard = self.ctx.lock(keys).await?;
        let mut tx = self.ctx.db().begin().await?;

        if !TransferRepository::set_status(
            &mut tx,
            tenant_id,
            transfer_id,
            &[TransferStatus::Shipped],
            TransferStatus::Completed,
        )
        .await?
        {
            tx.rollback().await?;
            return self.raced(tenant_id, transfer_id, TransferStatus::Completed).await;
        }

        for (item, source_product) in transfer.items.iter().zip(&source_products) {
            let unit_cost = item.transfer_price_cents.unwrap_or(source_product.cost_cents);

            let target = match ProductRepository::load_by_sku(&mut tx, tenant_id, dest_branch, &source_product.sku).await? {
                Some(product) => product,
                None => {
                    let created =
                        ProductRepository::insert(&mut tx, &NewProduct::copy_for_branch(source_product, dest_branch, unit_cost))
                            .await?;
                    debug!(product_id = %created.id, sku = %created.sku, branch_id = dest_branch, "Destination product created");
                    created
                }
            };

            let record = StockLedger::record(
                &mut tx,
                NewMovement::new(
                    tenant_id,
                    &target.id,
                    item.quantity,
                    MovementType::TransferIn,
                    &transfer.reference_id,
                )
                .notes(Some(&notes))
                .actor(tenant.actor_id.as_deref()),
            )
            .await?;

            let new_cost = weighted_average_cost(
                record.previous_balance,
                target.cost(),
                item.quantity,
                Money::from_cents(unit_cost),
            );
            if new_cost.cents() != target.cost_cents {
                ProductRepository::update_cost(&mut tx, tenant_id, &target.id, new_cost.cents()).await?;
            }
        }

        let completed = load(&mut tx, tenant_id, transfer_id).await?;
        tx.commit().await?;
        drop(guard);

        info!(transfer_id, reference = %completed.reference_id, "Transfer received");

        self.ctx.facts().publish(LedgerFact::TransferCompleted {
            tenant_id: tenant_id.to_string(),
            transfer_id: completed.id.clone(),
            reference: completed.reference_id.clone(),
        });

        Ok(Transitioned::applied(completed))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    pub async fn get(&self, tenant_id: &str, transfer_id: &str) -> SyncResult<StockTransfer> {
        self.ctx
            .db()
            .transfers()
            .get(tenant_id, transfer_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Transfer", transfer_id).into())
    }

    pub async fn list(&self, tenant_id: &str, status: Option<TransferStatus>) -> SyncResult<Vec<StockTransfer>> {
        Ok(self.ctx.db().transfers().list(tenant_id, status).await?)
    }

    /// The status compare-and-set missed: another call moved the transfer
    /// after we read it. Re-plan against what is there now.
    async fn raced(
        &self,
        tenant_id: &str,
        transfer_id: &str,
        target: TransferStatus,
    ) -> SyncResult<Transitioned<StockTransfer>> {
        let current = self.get(tenant_id, transfer_id).await?;
        match current.plan(target)? {
            Transition::AlreadyApplied => Ok(Transitioned::unchanged(current)),
            Transition::Apply => Err(SyncError::LockTimeout(format!(
                "transfer {} changed during {}",
                current.reference_id, target
            ))),
        }
    }
}

async fn load(conn: &mut sqlx::SqliteConnection, tenant_id: &str, transfer_id: &str) -> SyncResult<StockTransfer> {
    TransferRepository::load(conn, tenant_id, transfer_id)
        .await?
        .ok_or_else(|| CoreError::not_found("Transfer", transfer_id).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::fixtures::{self, TENANT};
    use crate::protocol::TransferLine;
    use stockline_core::Branch;

    const UUID: &str = "9a7e5c31-0000-4000-8000-000000000001";

    fn payload(source: &Branch, destination: &Branch, lines: &[(&str, i64)]) -> CreateTransferPayload {
        CreateTransferPayload {
            source_branch_id: source.id.clone(),
            destination_branch_id: destination.id.clone(),
            items: lines
                .iter()
                .map(|(product_id, quantity)| TransferLine {
                    product_id: product_id.to_string(),
                    quantity: *quantity,
                    transfer_price_cents: None,
                })
                .collect(),
            ..Default::default()
        }
    }

    async fn created(handler: &TransferHandler, uuid: Option<&str>, payload: CreateTransferPayload) -> StockTransfer {
        match handler.request(&fixtures::tenant(), uuid, payload).await.unwrap() {
            Synced::Created(transfer) => transfer,
            Synced::AlreadySynced(_) => panic!("expected a new transfer"),
        }
    }

    #[tokio::test]
    async fn test_request_is_idempotent() {
        let ctx = fixtures::context().await;
        let main = fixtures::branch(&ctx, "Main").await;
        let annex = fixtures::branch(&ctx, "Annex").await;
        let mug = fixtures::product(&ctx, &main, "MUG", 10, 500).await;
        let handler = TransferHandler::new(ctx.clone());

        let transfer = created(&handler, Some(UUID), payload(&main, &annex, &[(&mug.id, 2)])).await;
        assert!(transfer.reference_id.starts_with("TRF-"));
        assert_eq!(transfer.status, TransferStatus::Requested);
        assert_eq!(fixtures::stock(&ctx, &mug.id).await, 10);

        let replay = handler
            .request(&fixtures::tenant(), Some(UUID), payload(&main, &annex, &[(&mug.id, 2)]))
            .await
            .unwrap();
        let Synced::AlreadySynced(record) = replay else {
            panic!("replay must resolve to the first transfer");
        };
        assert_eq!(record.entity_id, transfer.id);
    }

    #[tokio::test]
    async fn test_request_matches_client_reference() {
        let ctx = fixtures::context().await;
        let main = fixtures::branch(&ctx, "Main").await;
        let annex = fixtures::branch(&ctx, "Annex").await;
        let mug = fixtures::product(&ctx, &main, "MUG", 10, 500).await;
        let handler = TransferHandler::new(ctx.clone());

        let mut first = payload(&main, &annex, &[(&mug.id, 1)]);
        first.reference_id = Some("TRF-CAFE0001".into());
        let transfer = created(&handler, None, first.clone()).await;
        assert_eq!(transfer.reference_id, "TRF-CAFE0001");

        let second = handler.request(&fixtures::tenant(), Some(UUID), first).await.unwrap();
        assert!(matches!(second, Synced::AlreadySynced(ref r) if r.entity_id == transfer.id));
    }

    #[tokio::test]
    async fn test_request_validation() {
        let ctx = fixtures::context().await;
        let main = fixtures::branch(&ctx, "Main").await;
        let annex = fixtures::branch(&ctx, "Annex").await;
        let mug = fixtures::product(&ctx, &main, "MUG", 10, 500).await;
        let stray = fixtures::product(&ctx, &annex, "CUP", 10, 500).await;
        let handler = TransferHandler::new(ctx.clone());
        let tenant = fixtures::tenant();

        let same_branch = handler.request(&tenant, None, payload(&main, &main, &[(&mug.id, 1)])).await;
        assert!(same_branch.unwrap_err().is_validation());

        let wrong_branch = handler.request(&tenant, None, payload(&main, &annex, &[(&stray.id, 1)])).await;
        assert!(wrong_branch.unwrap_err().is_validation());

        let zero = handler.request(&tenant, None, payload(&main, &annex, &[(&mug.id, 0)])).await;
        assert!(zero.unwrap_err().is_validation());

        let empty = handler.request(&tenant, None, payload(&main, &annex, &[])).await;
        assert!(empty.unwrap_err().is_validation());

        assert!(handler.list(TENANT, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transitions_are_idempotent() {
        let ctx = fixtures::context().await;
        let main = fixtures::branch(&ctx, "Main").await;
        let annex = fixtures::branch(&ctx, "Annex").await;
        let mug = fixtures::product(&ctx, &main, "MUG", 10, 500).await;
        let handler = TransferHandler::new(ctx.clone());
        let tenant = fixtures::tenant();

        let transfer = created(&handler, None, payload(&main, &annex, &[(&mug.id, 4)])).await;

        assert!(handler.approve(&tenant, &transfer.id).await.unwrap().is_applied());
        assert!(!handler.approve(&tenant, &transfer.id).await.unwrap().is_applied());

        let shipped = handler.ship(&tenant, &transfer.id).await.unwrap();
        assert!(shipped.is_applied());
        assert_eq!(fixtures::stock(&ctx, &mug.id).await, 6);

        // A repeated ship moves no stock
        assert!(!handler.ship(&tenant, &transfer.id).await.unwrap().is_applied());
        assert_eq!(fixtures::stock(&ctx, &mug.id).await, 6);

        let err = handler.cancel(&tenant, &transfer.id).await.unwrap_err();
        assert!(err.is_business_rule());

        let done = handler.receive(&tenant, &transfer.id).await.unwrap();
        assert_eq!(done.entity.status, TransferStatus::Completed);
        assert!(done.entity.completed_at.is_some());
        assert!(!handler.receive(&tenant, &transfer.id).await.unwrap().is_applied());

        let movements = ctx.db().ledger().by_reference(TENANT, &transfer.reference_id).await.unwrap();
        assert_eq!(movements.len(), 2);
        assert_eq!(movements[0].notes.as_deref(), Some("Shipped to Annex"));
        assert_eq!(movements[1].notes.as_deref(), Some("Received from Main"));
    }

    #[tokio::test]
    async fn test_cancel_before_shipping() {
        let ctx = fixtures::context().await;
        let main = fixtures::branch(&ctx, "Main").await;
        let annex = fixtures::branch(&ctx, "Annex").await;
        let mug = fixtures::product(&ctx, &main, "MUG", 10, 500).await;
        let handler = TransferHandler::new(ctx.clone());
        let tenant = fixtures::tenant();

        let transfer = created(&handler, None, payload(&main, &annex, &[(&mug.id, 4)])).await;
        assert!(handler.cancel(&tenant, &transfer.id).await.unwrap().is_applied());
        assert!(!handler.cancel(&tenant, &transfer.id).await.unwrap().is_applied());

        let err = handler.approve(&tenant, &transfer.id).await.unwrap_err();
        assert!(matches!(err, SyncError::Domain(CoreError::InvalidTransition { .. })));
        assert_eq!(fixtures::stock(&ctx, &mug.id).await, 10);
    }

    #[tokio::test]
    async fn test_receive_creates_destination_product() {
        let ctx = fixtures::context().await;
        let main = fixtures::branch(&ctx, "Main").await;
        let annex = fixtures::branch(&ctx, "Annex").await;
        let mug = fixtures::product(&ctx, &main, "MUG", 10, 500).await;
        let handler = TransferHandler::new(ctx.clone());
        let tenant = fixtures::tenant();

        let transfer = created(&handler, None, payload(&main, &annex, &[(&mug.id, 3)])).await;
        handler.approve(&tenant, &transfer.id).await.unwrap();
        handler.ship(&tenant, &transfer.id).await.unwrap();
        handler.receive(&tenant, &transfer.id).await.unwrap();

        let copy = ctx.db().products().find_by_sku(TENANT, &annex.id, "MUG").await.unwrap().unwrap();
        assert_ne!(copy.id, mug.id);
        assert_eq!(copy.stock_quantity, 3);
        assert_eq!(copy.cost_cents, 500);
        assert_eq!(copy.price_cents, mug.price_cents);
        assert_eq!(copy.name, mug.name);
    }
}
