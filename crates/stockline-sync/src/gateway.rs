//! # Sync Gateway
//!
//! Single entry point for replayed terminal transactions.
//!
//! ## Processing
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  body ──► Envelope::parse ──MalformedEnvelope──► {error} 400           │
//! │                │                                                        │
//! │                ▼ dispatch on type                                       │
//! │   order ──────────► OrderHandler::sync_order                           │
//! │   complete_order ─► OrderHandler::complete_pending_order               │
//! │   create_transfer ► TransferHandler::request                           │
//! │   create_po ──────► PurchaseHandler::create_po                         │
//! │   anything else ──► ignored                                            │
//! │                │                                                        │
//! │                ▼                                                        │
//! │  SyncOutcome ──► SyncReply {status | error, http_status}               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The gateway holds no state of its own and takes no locks; the handlers
//! do. The tenant is always passed in by the caller.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::{SyncError, SyncResult};
use crate::handlers::{HandlerContext, OrderHandler, PurchaseHandler, StockHandler, Synced, TransferHandler};
use crate::protocol::{
    CompleteOrderPayload, CreatePoPayload, CreateTransferPayload, Envelope, EnvelopeType, OrderPayload, SyncOutcome,
    SyncReply,
};
use stockline_core::validation::validate_required;
use stockline_core::{EntityKind, TenantContext};

#[derive(Debug, Clone)]
pub struct SyncGateway {
    ctx: HandlerContext,
    orders: OrderHandler,
    transfers: TransferHandler,
    purchases: PurchaseHandler,
    stock: StockHandler,
}

impl SyncGateway {
    pub fn new(ctx: HandlerContext) -> Self {
        SyncGateway {
            orders: OrderHandler::new(ctx.clone()),
            transfers: TransferHandler::new(ctx.clone()),
            purchases: PurchaseHandler::new(ctx.clone()),
            stock: StockHandler::new(ctx.clone()),
            ctx,
        }
    }

    /// Opens the configured database and builds a gateway on it.
    pub async fn connect(config: &GatewayConfig) -> SyncResult<Self> {
        Ok(SyncGateway::new(HandlerContext::connect(config).await?))
    }

    pub fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    pub fn orders(&self) -> &OrderHandler {
        &self.orders
    }

    pub fn transfers(&self) -> &TransferHandler {
        &self.transfers
    }

    pub fn purchases(&self) -> &PurchaseHandler {
        &self.purchases
    }

    pub fn stock(&self) -> &StockHandler {
        &self.stock
    }

    /// Parses, dispatches and answers one raw envelope.
    pub async fn process(&self, tenant: &TenantContext, body: &Value) -> SyncReply {
        match Envelope::parse(body) {
            Ok(envelope) => self.handle(tenant, envelope).await.into(),
            Err(err) => {
                warn!(tenant_id = %tenant.tenant_id, error = %err, "Rejected envelope");
                SyncReply::rejected(&err)
            }
        }
    }

    /// Dispatches a parsed envelope. Failures come back as
    /// [`SyncOutcome::Rejected`], never as a panic or a dropped error.
    pub async fn handle(&self, tenant: &TenantContext, envelope: Envelope) -> SyncOutcome {
        let kind = envelope.kind.clone();
        let outcome = self
            .dispatch(tenant, envelope.clone())
            .await
            .unwrap_or_else(SyncOutcome::from);

        match &outcome {
            SyncOutcome::Rejected(err) => warn!(
                tenant_id = %tenant.tenant_id,
                uuid = %envelope.uuid,
                envelope_type = %kind,
                error = %err,
                retryable = err.is_retryable(),
                "Envelope rejected"
            ),
            SyncOutcome::Ignored { envelope_type } => {
                debug!(uuid = %envelope.uuid, envelope_type, "Envelope type ignored")
            }
            other => info!(
                tenant_id = %tenant.tenant_id,
                uuid = %envelope.uuid,
                envelope_type = %kind,
                status = other.status(),
                "Envelope processed"
            ),
        }

        outcome
    }

    async fn dispatch(&self, tenant: &TenantContext, envelope: Envelope) -> SyncResult<SyncOutcome> {
        validate_required("tenant_id", &tenant.tenant_id)?;

        match &envelope.kind {
            EnvelopeType::Order => {
                let payload: OrderPayload = envelope.payload()?;
                Ok(match self.orders.sync_order(tenant, &envelope.uuid, payload).await? {
                    Synced::Created(order) => SyncOutcome::Created {
                        kind: EntityKind::Order,
                        id: order.id,
                        reference: order.order_number,
                    },
                    Synced::AlreadySynced(record) => SyncOutcome::AlreadySynced {
                        kind: EntityKind::Order,
                        record,
                    },
                })
            }

            EnvelopeType::CompleteOrder => {
                let payload: CompleteOrderPayload = envelope.payload()?;
                validate_required("order_id", &payload.order_id)?;
                let done = self.orders.complete_pending_order(tenant, &payload.order_id).await?;
                Ok(SyncOutcome::OrderCompleted {
                    already: !done.is_applied(),
                    order_id: done.entity.id,
                })
            }

            EnvelopeType::CreateTransfer => {
                let payload: CreateTransferPayload = envelope.payload()?;
                Ok(
                    match self.transfers.request(tenant, Some(&envelope.uuid), payload).await? {
                        Synced::Created(transfer) => SyncOutcome::Created {
                            kind: EntityKind::Transfer,
                            id: transfer.id,
                            reference: transfer.reference_id,
                        },
                        Synced::AlreadySynced(record) => SyncOutcome::AlreadySynced {
                            kind: EntityKind::Transfer,
                            record,
                        },
                    },
                )
            }

            EnvelopeType::CreatePurchaseOrder => {
                let payload: CreatePoPayload = envelope.payload()?;
                Ok(match self.purchases.create_po(tenant, &envelope.uuid, payload).await? {
                    Synced::Created(po) => SyncOutcome::Created {
                        kind: EntityKind::PurchaseOrder,
                        id: po.id,
                        reference: po.reference_id,
                    },
                    Synced::AlreadySynced(record) => SyncOutcome::AlreadySynced {
                        kind: EntityKind::PurchaseOrder,
                        record,
                    },
                })
            }

            EnvelopeType::Unknown(other) => Ok(SyncOutcome::Ignored {
                envelope_type: other.clone(),
            }),
        }
    }
}

impl From<SyncError> for SyncOutcome {
    fn from(err: SyncError) -> Self {
        SyncOutcome::Rejected(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::fixtures;
    use serde_json::json;

    #[tokio::test]
    async fn test_order_envelope_round_trip() {
        let ctx = fixtures::context().await;
        let main = fixtures::branch(&ctx, "Main").await;
        let mug = fixtures::product(&ctx, &main, "MUG", 5, 250).await;
        let gateway = SyncGateway::new(ctx.clone());
        let tenant = fixtures::tenant();

        let body = json!({
            "uuid": "c3f1a2b4-0000-4000-8000-000000000001",
            "type": "order",
            "data": {"branch_id": main.id, "items": [{"product_id": mug.id, "quantity": 2}]}
        });

        let first = gateway.process(&tenant, &body).await;
        assert_eq!(first.http_status, 201);
        assert_eq!(first.order_number.as_deref(), Some("ORD-000001"));

        let second = gateway.process(&tenant, &body).await;
        assert_eq!(second.http_status, 200);
        assert_eq!(
            serde_json::to_value(&second).unwrap(),
            json!({"status": "exists", "message": "Transaction already processed"})
        );
        assert_eq!(fixtures::stock(&ctx, &mug.id).await, 3);
    }

    #[tokio::test]
    async fn test_unknown_type_ignored() {
        let gateway = SyncGateway::new(fixtures::context().await);
        let reply = gateway
            .process(
                &fixtures::tenant(),
                &json!({"uuid": "c3f1a2b4-0000-4000-8000-000000000002", "type": "shift_close", "data": {}}),
            )
            .await;
        assert_eq!(reply.http_status, 200);
        assert_eq!(serde_json::to_value(&reply).unwrap(), json!({"status": "ignored"}));
    }

    #[tokio::test]
    async fn test_rejections_are_visible() {
        let gateway = SyncGateway::new(fixtures::context().await);
        let tenant = fixtures::tenant();

        let malformed = gateway.process(&tenant, &json!({"type": "order"})).await;
        assert_eq!(malformed.http_status, 400);
        assert!(malformed.error.is_some());

        let unknown_branch = gateway
            .process(
                &tenant,
                &json!({
                    "uuid": "c3f1a2b4-0000-4000-8000-000000000003",
                    "type": "order",
                    "data": {"branch_id": "nowhere", "items": [{"product_id": "p", "quantity": 1}]}
                }),
            )
            .await;
        assert_eq!(unknown_branch.http_status, 400);
        assert_eq!(unknown_branch.error.as_deref(), Some("Branch not found: nowhere"));

        let missing_order = gateway
            .process(
                &tenant,
                &json!({
                    "uuid": "c3f1a2b4-0000-4000-8000-000000000004",
                    "type": "complete_order",
                    "data": {"order_id": "nope"}
                }),
            )
            .await;
        assert_eq!(missing_order.http_status, 400);
    }

    #[tokio::test]
    async fn test_blank_tenant_rejected() {
        let gateway = SyncGateway::new(fixtures::context().await);
        let outcome = gateway
            .handle(
                &TenantContext::new(""),
                Envelope::parse(&json!({
                    "uuid": "c3f1a2b4-0000-4000-8000-000000000005",
                    "type": "order",
                    "data": {}
                }))
                .unwrap(),
            )
            .await;
        assert!(outcome.error().is_some_and(|e| e.is_validation()));
    }
}
