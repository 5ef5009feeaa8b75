//! # Stock Adjustments and Audit
//!
//! Manual corrections, read access to one product's ledger, and the
//! component lists of composite products.

use std::collections::HashSet;

use tracing::{info, warn};

use super::{require_branch_product, HandlerContext};
use crate::error::{SyncError, SyncResult};
use crate::facts::LedgerFact;
use crate::protocol::{AdjustPayload, ComponentsPayload};
use stockline_core::reference;
use stockline_core::validation::{validate_adjustment, validate_notes, validate_quantity, validate_required};
use stockline_core::{MovementType, ProductComponent, StockMovement, TenantContext, ValidationError, MAX_LINE_ITEMS};
use stockline_db::{LedgerAudit, MovementRecord, NewMovement, ProductRepository, StockLedger};

/// Prefix for adjustment references generated when the caller gives none.
const ADJUSTMENT_PREFIX: &str = "ADJ";

#[derive(Debug, Clone)]
pub struct StockHandler {
    ctx: HandlerContext,
}

impl StockHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        StockHandler { ctx }
    }

    /// Books a signed correction as an `adjustment` movement.
    ///
    /// Adjustments are the one movement allowed to take stock below zero.
    pub async fn adjust_stock(
        &self,
        tenant: &TenantContext,
        product_id: &str,
        payload: AdjustPayload,
    ) -> SyncResult<MovementRecord> {
        let tenant_id = tenant.tenant_id.as_str();
        validate_adjustment(payload.quantity_change)?;
        validate_notes(payload.reason.as_deref())?;
        if let Some(batch_id) = payload.batch_id.as_deref() {
            validate_required("batch_id", batch_id)?;
        }

        let product = self.ctx.require_product(tenant_id, product_id).await?;
        let reference = payload
            .reference
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| reference::generate(ADJUSTMENT_PREFIX));

        let guard = self.ctx.lock([product.id.clone()]).await?;
        let mut tx = self.ctx.db().begin().await?;
        let record = StockLedger::record(
            &mut tx,
            NewMovement::new(
                tenant_id,
                &product.id,
                payload.quantity_change,
                MovementType::Adjustment,
                &reference,
            )
            .notes(payload.reason.as_deref())
            .actor(tenant.actor_id.as_deref())
            .batch(payload.batch_id.as_deref()),
        )
        .await?;
        tx.commit().await?;
        drop(guard);

        if record.balance_after() < 0 {
            warn!(product_id, balance = record.balance_after(), "Adjustment left negative stock");
        }
        info!(
            product_id,
            quantity_change = payload.quantity_change,
            balance = record.balance_after(),
            reference = %reference,
            "Stock adjusted"
        );

        self.ctx.facts().publish_all(LedgerFact::low_stock([&record]));
        Ok(record)
    }

    /// Replaces the components a composite product sells as.
    ///
    /// Components must be plain products of the same branch; bundles do not
    /// nest, so a product that is itself a component cannot get components.
    pub async fn set_components(
        &self,
        tenant: &TenantContext,
        product_id: &str,
        payload: ComponentsPayload,
    ) -> SyncResult<Vec<ProductComponent>> {
        let tenant_id = tenant.tenant_id.as_str();
        let parent = self.ctx.require_product(tenant_id, product_id).await?;

        if payload.components.len() > MAX_LINE_ITEMS {
            return Err(ValidationError::OutOfRange {
                field: "components".to_string(),
                min: 0,
                max: MAX_LINE_ITEMS as i64,
            }
            .into());
        }
        if !payload.components.is_empty() && self.ctx.db().products().is_component(tenant_id, &parent.id).await? {
            return Err(invalid_component(format!("{} is a component of another product", parent.id)));
        }

        let mut seen = HashSet::new();
        let mut rows = Vec::with_capacity(payload.components.len());
        for line in payload.components {
            validate_quantity(line.quantity)?;
            let component = self.ctx.require_product(tenant_id, &line.product_id).await?;
            require_branch_product(&component, &parent.branch_id)?;

            if component.id == parent.id {
                return Err(invalid_component(format!("{} cannot contain itself", parent.id)));
            }
            if component.is_composite {
                return Err(invalid_component(format!("{} is itself composite", component.id)));
            }
            if !seen.insert(component.id.clone()) {
                return Err(invalid_component(format!("{} is listed twice", component.id)));
            }
            rows.push((component.id, line.quantity));
        }

        let mut tx = self.ctx.db().begin().await?;
        let components = ProductRepository::set_components(&mut tx, tenant_id, &parent.id, &rows).await?;
        tx.commit().await?;

        info!(product_id, components = components.len(), "Product components set");
        Ok(components)
    }

    pub async fn components(&self, tenant: &TenantContext, product_id: &str) -> SyncResult<Vec<ProductComponent>> {
        self.ctx.require_product(&tenant.tenant_id, product_id).await?;
        Ok(self.ctx.db().products().components(&tenant.tenant_id, product_id).await?)
    }

    /// All movements of a product, oldest first.
    pub async fn history(&self, tenant: &TenantContext, product_id: &str) -> SyncResult<Vec<StockMovement>> {
        self.ctx.require_product(&tenant.tenant_id, product_id).await?;
        Ok(self.ctx.db().ledger().history(&tenant.tenant_id, product_id).await?)
    }

    /// Replays the product's ledger and compares it with the cached stock.
    pub async fn audit(&self, tenant: &TenantContext, product_id: &str) -> SyncResult<LedgerAudit> {
        let audit = self.ctx.db().ledger().audit(&tenant.tenant_id, product_id).await?;
        if !audit.is_consistent() {
            warn!(
                product_id,
                cached = audit.cached_quantity,
                replayed = audit.replayed_quantity,
                first_break = ?audit.first_break,
                "Ledger does not reconstruct cached stock"
            );
        }
        Ok(audit)
    }
}

fn invalid_component(reason: String) -> SyncError {
    ValidationError::InvalidFormat {
        field: "components".to_string(),
        reason,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::fixtures;
    use crate::protocol::ComponentLine;

    fn adjust(quantity_change: i64) -> AdjustPayload {
        AdjustPayload {
            quantity_change,
            reason: Some("Cycle count".into()),
            reference: None,
            batch_id: None,
        }
    }

    #[tokio::test]
    async fn test_adjustment_may_go_negative() {
        let ctx = fixtures::context().await;
        let main = fixtures::branch(&ctx, "Main").await;
        let mug = fixtures::product(&ctx, &main, "MUG", 2, 500).await;
        let handler = StockHandler::new(ctx.clone());
        let tenant = fixtures::tenant();

        let record = handler.adjust_stock(&tenant, &mug.id, adjust(-5)).await.unwrap();
        assert_eq!(record.balance_after(), -3);
        assert!(record.movement.reference.starts_with("ADJ-"));
        assert_eq!(record.movement.notes.as_deref(), Some("Cycle count"));

        let audit = handler.audit(&tenant, &mug.id).await.unwrap();
        assert!(audit.is_consistent());
        assert_eq!(audit.replayed_quantity, -3);
        assert_eq!(handler.history(&tenant, &mug.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_adjustment_keeps_batch() {
        let ctx = fixtures::context().await;
        let main = fixtures::branch(&ctx, "Main").await;
        let milk = fixtures::product(&ctx, &main, "MILK", 12, 90).await;

        let payload = AdjustPayload {
            batch_id: Some("LOT-2026-10".into()),
            ..adjust(-4)
        };
        let record = StockHandler::new(ctx.clone())
            .adjust_stock(&fixtures::tenant(), &milk.id, payload)
            .await
            .unwrap();
        assert_eq!(record.movement.batch_id.as_deref(), Some("LOT-2026-10"));

        let history = ctx.db().ledger().history(fixtures::TENANT, &milk.id).await.unwrap();
        assert_eq!(history.last().and_then(|m| m.batch_id.as_deref()), Some("LOT-2026-10"));
    }

    #[tokio::test]
    async fn test_zero_adjustment_rejected() {
        let ctx = fixtures::context().await;
        let main = fixtures::branch(&ctx, "Main").await;
        let mug = fixtures::product(&ctx, &main, "MUG", 2, 500).await;

        let err = StockHandler::new(ctx.clone())
            .adjust_stock(&fixtures::tenant(), &mug.id, adjust(0))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_low_stock_fact_published() {
        let ctx = fixtures::context().await;
        let main = fixtures::branch(&ctx, "Main").await;
        let mug = fixtures::product(&ctx, &main, "MUG", 5, 500).await;
        let mut facts = ctx.facts().subscribe();

        StockHandler::new(ctx.clone())
            .adjust_stock(&fixtures::tenant(), &mug.id, adjust(-3))
            .await
            .unwrap();

        let fact = facts.try_recv().unwrap();
        assert!(matches!(
            fact,
            LedgerFact::StockBelowThreshold { balance: 2, threshold: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_component_rules() {
        let ctx = fixtures::context().await;
        let main = fixtures::branch(&ctx, "Main").await;
        let annex = fixtures::branch(&ctx, "Annex").await;
        let bundle = fixtures::product(&ctx, &main, "GIFT-BOX", 0, 0).await;
        let mug = fixtures::product(&ctx, &main, "MUG", 5, 300).await;
        let far = fixtures::product(&ctx, &annex, "MUG", 5, 300).await;
        let handler = StockHandler::new(ctx.clone());
        let tenant = fixtures::tenant();

        let components = |lines: &[(&str, i64)]| ComponentsPayload {
            components: lines
                .iter()
                .map(|(id, quantity)| ComponentLine {
                    product_id: id.to_string(),
                    quantity: *quantity,
                })
                .collect(),
        };

        for bad in [
            components(&[(bundle.id.as_str(), 1)]),
            components(&[(far.id.as_str(), 1)]),
            components(&[(mug.id.as_str(), 0)]),
            components(&[(mug.id.as_str(), 1), (mug.id.as_str(), 2)]),
        ] {
            let err = handler.set_components(&tenant, &bundle.id, bad).await.unwrap_err();
            assert!(err.is_validation());
        }

        let set = handler
            .set_components(&tenant, &bundle.id, components(&[(mug.id.as_str(), 2)]))
            .await
            .unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].quantity, 2);

        // No nesting in either direction.
        let err = handler
            .set_components(&tenant, &mug.id, components(&[(far.id.as_str(), 1)]))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let outer = fixtures::product(&ctx, &main, "HAMPER", 0, 0).await;
        let err = handler
            .set_components(&tenant, &outer.id, components(&[(bundle.id.as_str(), 1)]))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_history_of_unknown_product() {
        let ctx = fixtures::context().await;
        let err = StockHandler::new(ctx)
            .history(&fixtures::tenant(), "missing")
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
