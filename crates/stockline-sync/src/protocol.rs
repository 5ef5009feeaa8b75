//! # Sync Protocol
//!
//! Wire types for replayed terminal transactions.
//!
//! ## Envelope
//! ```text
//! {
//!   "uuid": "<client-generated UUID v4>",       ← idempotency key
//!   "type": "order" | "complete_order" | "create_po" | "create_transfer",
//!   "data": { ...type-specific payload... }
//! }
//! ```
//!
//! ## Replies
//! ```text
//! ┌──────────────────┬────────────────────────────────────────┬────────┐
//! │ Outcome          │ Body                                   │ HTTP   │
//! ├──────────────────┼────────────────────────────────────────┼────────┤
//! │ order created    │ {status:"success", id, order_number}   │ 201    │
//! │ order exists     │ {status:"exists", message}             │ 200    │
//! │ transfer created │ {status:"success", id, reference}      │ 201    │
//! │ transfer exists  │ {status:"exists", id, reference}       │ 200    │
//! │ PO created       │ {status:"success", id, reference}      │ 201    │
//! │ PO exists        │ {status:"exists", message}             │ 200    │
//! │ order completed  │ {status:"success", message}            │ 200    │
//! │ unknown type     │ {status:"ignored"}                     │ 200    │
//! │ rejected         │ {error}                                │ 400    │
//! │ lock timeout     │ {error, retryable:true}                │ 503    │
//! │ database failure │ {error}                                │ 500    │
//! └──────────────────┴────────────────────────────────────────┴────────┘
//! ```
//!
//! Money fields are integer cents (`*_cents`). Field aliases accept the
//! older terminal spellings (`id` for `product_id`, `destination_branch`,
//! `supplier`, `cost_cents`).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{SyncError, SyncResult};
use stockline_core::{EntityKind, IdempotencyRecord, OrderStatus, OrderingType, PaymentMethod};

// =============================================================================
// Envelope
// =============================================================================

/// What the envelope's `type` asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeType {
    Order,
    CompleteOrder,
    CreatePurchaseOrder,
    CreateTransfer,

    /// Anything else. Acknowledged as `ignored`, never an error.
    Unknown(String),
}

impl EnvelopeType {
    pub fn parse(s: &str) -> Self {
        match s {
            "order" => EnvelopeType::Order,
            "complete_order" => EnvelopeType::CompleteOrder,
            "create_po" => EnvelopeType::CreatePurchaseOrder,
            "create_transfer" => EnvelopeType::CreateTransfer,
            other => EnvelopeType::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EnvelopeType::Order => "order",
            EnvelopeType::CompleteOrder => "complete_order",
            EnvelopeType::CreatePurchaseOrder => "create_po",
            EnvelopeType::CreateTransfer => "create_transfer",
            EnvelopeType::Unknown(other) => other,
        }
    }
}

impl fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    uuid: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    data: Option<Value>,
}

/// A shape-checked envelope. `data` is decoded later, per type.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub uuid: String,
    pub kind: EnvelopeType,
    pub data: Value,
}

impl Envelope {
    /// Checks `uuid`, `type` and `data` are present and well formed.
    ///
    /// ## Errors
    /// * `SyncError::MalformedEnvelope` - Missing field, non-UUID `uuid`, or
    ///   `data` that is not a JSON object
    pub fn parse(body: &Value) -> SyncResult<Self> {
        let raw = RawEnvelope::deserialize(body).map_err(|e| SyncError::MalformedEnvelope(e.to_string()))?;

        let uuid = raw
            .uuid
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| SyncError::MalformedEnvelope("uuid is required".into()))?;
        let kind = raw
            .kind
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| SyncError::MalformedEnvelope("type is required".into()))?;
        let data = raw
            .data
            .ok_or_else(|| SyncError::MalformedEnvelope("data is required".into()))?;

        if uuid::Uuid::parse_str(uuid.trim()).is_err() {
            return Err(SyncError::MalformedEnvelope(format!("uuid is not a valid UUID: {uuid}")));
        }

        if !data.is_object() {
            return Err(SyncError::MalformedEnvelope("data must be an object".into()));
        }

        Ok(Envelope {
            uuid: uuid.trim().to_string(),
            kind: EnvelopeType::parse(kind.trim()),
            data,
        })
    }

    /// Decodes `data` into the payload of this envelope's type.
    pub fn payload<T: DeserializeOwned>(&self) -> SyncResult<T> {
        decode(self.kind.as_str(), self.data.clone())
    }
}

/// Decodes a JSON payload, naming `kind` in the error.
pub fn decode<T: DeserializeOwned>(kind: &str, data: Value) -> SyncResult<T> {
    serde_json::from_value(data).map_err(|e| SyncError::invalid_payload(kind, e.to_string()))
}

// =============================================================================
// Payloads
// =============================================================================

/// `order`: a sale rung up on a terminal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderPayload {
    pub branch_id: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub cashier_id: Option<String>,

    /// Terminal-assigned number; the server assigns `ORD-nnnnnn` otherwise.
    #[serde(default)]
    pub order_number: Option<String>,
    #[serde(default)]
    pub ordering_type: OrderingType,
    #[serde(default)]
    pub payment_method: PaymentMethod,

    /// Overrides the ordering type's default status.
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub subtotal_cents: Option<i64>,
    #[serde(default)]
    pub tax_cents: Option<i64>,
    #[serde(default)]
    pub total_cents: Option<i64>,
    #[serde(default)]
    pub items: Vec<OrderLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    #[serde(alias = "id")]
    pub product_id: String,
    pub quantity: i64,

    /// Defaults to the product's current price.
    #[serde(default)]
    pub price_cents: Option<i64>,
}

/// `complete_order`: finalize a pending (kiosk) order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteOrderPayload {
    #[serde(alias = "id")]
    pub order_id: String,
    #[serde(default)]
    pub cashier_id: Option<String>,
}

/// `create_transfer`: request stock to move between two branches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTransferPayload {
    #[serde(alias = "source_branch")]
    pub source_branch_id: String,
    #[serde(alias = "destination_branch")]
    pub destination_branch_id: String,

    /// Client-chosen reference; a second transfer with it resolves to the first.
    #[serde(default)]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub items: Vec<TransferLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferLine {
    #[serde(alias = "id")]
    pub product_id: String,
    pub quantity: i64,
    #[serde(default)]
    pub transfer_price_cents: Option<i64>,
}

/// `create_po`: order stock from a supplier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePoPayload {
    pub branch_id: String,
    #[serde(alias = "supplier")]
    pub supplier_id: String,
    #[serde(default)]
    pub expected_date: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,

    /// Paid on ordering; whatever is left becomes supplier credit.
    #[serde(default, alias = "amount_paid")]
    pub amount_paid_cents: i64,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub items: Vec<PoLine>,
}

/// A payment against a supplier's outstanding balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierPaymentPayload {
    #[serde(alias = "amount")]
    pub amount_cents: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoLine {
    #[serde(alias = "id")]
    pub product_id: String,
    pub quantity: i64,

    /// Defaults to the product's current cost.
    #[serde(default, alias = "cost_cents")]
    pub unit_cost_cents: Option<i64>,
}

/// Body of a purchase-order receive. Lines not listed arrive as ordered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceivePoPayload {
    #[serde(default)]
    pub received_items: Vec<ReceivedLine>,
}

/// Override for one PO line, matched by `item_id` or else `product_id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceivedLine {
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default, alias = "cost_cents")]
    pub unit_cost_cents: Option<i64>,

    /// Supplier lot the goods arrived under, copied onto the movement.
    #[serde(default, alias = "batch_number")]
    pub batch_id: Option<String>,
}

/// Manual stock correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustPayload {
    pub quantity_change: i64,
    #[serde(default)]
    pub reason: Option<String>,

    /// Correlation id for the movement; `ADJ-xxxxxxxx` when absent.
    #[serde(default)]
    pub reference: Option<String>,

    /// Lot being corrected (expired or damaged stock).
    #[serde(default)]
    pub batch_id: Option<String>,
}

/// Full component list of a composite product; empty makes it plain again.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentsPayload {
    #[serde(default)]
    pub components: Vec<ComponentLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentLine {
    #[serde(alias = "component_id")]
    pub product_id: String,
    #[serde(default = "one")]
    pub quantity: i64,
}

fn one() -> i64 {
    1
}

// =============================================================================
// Outcome
// =============================================================================

/// Normalized result of one envelope.
#[derive(Debug)]
pub enum SyncOutcome {
    Created {
        kind: EntityKind,
        id: String,
        reference: String,
    },
    AlreadySynced {
        kind: EntityKind,
        record: IdempotencyRecord,
    },
    /// `complete_order`; `already` when the order was completed before.
    OrderCompleted { order_id: String, already: bool },
    Ignored { envelope_type: String },
    Rejected(SyncError),
}

impl SyncOutcome {
    /// `created`, `already_synced`, `ignored` or `rejected`.
    pub fn status(&self) -> &'static str {
        match self {
            SyncOutcome::Created { .. } => "created",
            SyncOutcome::OrderCompleted { already: false, .. } => "created",
            SyncOutcome::AlreadySynced { .. } => "already_synced",
            SyncOutcome::OrderCompleted { already: true, .. } => "already_synced",
            SyncOutcome::Ignored { .. } => "ignored",
            SyncOutcome::Rejected(_) => "rejected",
        }
    }

    pub fn error(&self) -> Option<&SyncError> {
        match self {
            SyncOutcome::Rejected(e) => Some(e),
            _ => None,
        }
    }
}

// =============================================================================
// Reply
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Success,
    Exists,
    Ignored,
}

/// JSON body returned to the terminal, plus its HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ReplyStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,

    #[serde(skip)]
    pub http_status: u16,
}

impl SyncReply {
    fn with_status(status: ReplyStatus, http_status: u16) -> Self {
        SyncReply {
            status: Some(status),
            http_status,
            ..Default::default()
        }
    }

    /// Maps a rejection to `{error}` with 400, 503 or 500.
    pub fn rejected(err: &SyncError) -> Self {
        let http_status = if err.is_retryable() {
            503
        } else if err.is_validation() || err.is_business_rule() {
            400
        } else {
            500
        };

        SyncReply {
            error: Some(err.to_string()),
            retryable: err.is_retryable().then_some(true),
            http_status,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl From<SyncOutcome> for SyncReply {
    fn from(outcome: SyncOutcome) -> Self {
        match outcome {
            SyncOutcome::Created { kind, id, reference } => {
                let mut reply = SyncReply::with_status(ReplyStatus::Success, 201);
                reply.id = Some(id);
                match kind {
                    EntityKind::Order => reply.order_number = Some(reference),
                    EntityKind::Transfer | EntityKind::PurchaseOrder => reply.reference = Some(reference),
                }
                reply
            }

            SyncOutcome::AlreadySynced { kind, record } => {
                let mut reply = SyncReply::with_status(ReplyStatus::Exists, 200);
                match kind {
                    EntityKind::Transfer => {
                        reply.id = Some(record.entity_id);
                        reply.reference = Some(record.reference);
                    }
                    EntityKind::Order | EntityKind::PurchaseOrder => {
                        reply.message = Some("Transaction already processed".to_string());
                    }
                }
                reply
            }

            SyncOutcome::OrderCompleted { already, .. } => {
                let mut reply = SyncReply::with_status(ReplyStatus::Success, 200);
                reply.message = Some(
                    if already {
                        "Order already completed"
                    } else {
                        "Order completed successfully"
                    }
                    .to_string(),
                );
                reply
            }

            SyncOutcome::Ignored { .. } => SyncReply::with_status(ReplyStatus::Ignored, 200),

            SyncOutcome::Rejected(err) => SyncReply::rejected(&err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stockline_core::CoreError;

    const UUID: &str = "0b9c6f4e-8a51-4b1e-9c1f-6d1f0e2a7c11";

    #[test]
    fn test_parse_envelope() {
        let env = Envelope::parse(&json!({
            "uuid": UUID,
            "type": "create_transfer",
            "data": {"source_branch": "a", "destination_branch": "b", "items": []}
        }))
        .unwrap();

        assert_eq!(env.kind, EnvelopeType::CreateTransfer);
        let payload: CreateTransferPayload = env.payload().unwrap();
        assert_eq!(payload.source_branch_id, "a");
        assert_eq!(payload.destination_branch_id, "b");
    }

    #[test]
    fn test_malformed_envelopes() {
        let cases = [
            json!({"type": "order", "data": {}}),
            json!({"uuid": UUID, "data": {}}),
            json!({"uuid": UUID, "type": "order"}),
            json!({"uuid": "not-a-uuid", "type": "order", "data": {}}),
            json!({"uuid": UUID, "type": "order", "data": [1, 2]}),
            json!({"uuid": 42, "type": "order", "data": {}}),
            json!("just a string"),
        ];

        for body in cases {
            let err = Envelope::parse(&body).unwrap_err();
            assert!(matches!(err, SyncError::MalformedEnvelope(_)), "{body}");
        }
    }

    #[test]
    fn test_unknown_type_is_kept() {
        let env = Envelope::parse(&json!({"uuid": UUID, "type": "shift_close", "data": {}})).unwrap();
        assert_eq!(env.kind, EnvelopeType::Unknown("shift_close".into()));
    }

    #[test]
    fn test_payload_aliases_and_defaults() {
        let order: OrderPayload = decode(
            "order",
            json!({"branch_id": "b", "items": [{"id": "p", "quantity": 2}]}),
        )
        .unwrap();
        assert_eq!(order.items[0].product_id, "p");
        assert_eq!(order.ordering_type, OrderingType::Pos);
        assert_eq!(order.payment_method, PaymentMethod::Cash);
        assert!(order.status.is_none());

        let po: CreatePoPayload = decode(
            "create_po",
            json!({"branch_id": "b", "supplier": "s", "items": [{"product_id": "p", "quantity": 1, "cost_cents": 250}]}),
        )
        .unwrap();
        assert_eq!(po.supplier_id, "s");
        assert_eq!(po.items[0].unit_cost_cents, Some(250));
    }

    #[test]
    fn test_bad_payload_names_its_type() {
        let err = decode::<OrderPayload>("order", json!({"items": []})).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().starts_with("Invalid order payload"));
    }

    #[test]
    fn test_reply_shapes() {
        let created = SyncReply::from(SyncOutcome::Created {
            kind: EntityKind::Order,
            id: "o-1".into(),
            reference: "ORD-000001".into(),
        });
        assert_eq!(created.http_status, 201);
        assert_eq!(
            serde_json::to_value(&created).unwrap(),
            json!({"status": "success", "id": "o-1", "order_number": "ORD-000001"})
        );

        let exists = SyncReply::from(SyncOutcome::AlreadySynced {
            kind: EntityKind::Transfer,
            record: IdempotencyRecord {
                entity_id: "t-1".into(),
                reference: "TRF-0A1B2C3D".into(),
                client_uuid: None,
            },
        });
        assert_eq!(exists.http_status, 200);
        assert_eq!(
            serde_json::to_value(&exists).unwrap(),
            json!({"status": "exists", "id": "t-1", "reference": "TRF-0A1B2C3D"})
        );

        let ignored = SyncReply::from(SyncOutcome::Ignored {
            envelope_type: "shift_close".into(),
        });
        assert_eq!(serde_json::to_value(&ignored).unwrap(), json!({"status": "ignored"}));
    }

    #[test]
    fn test_rejection_status_codes() {
        let busy = SyncReply::rejected(&SyncError::LockTimeout("p-1".into()));
        assert_eq!(busy.http_status, 503);
        assert_eq!(busy.retryable, Some(true));

        let stock = SyncReply::rejected(&SyncError::Domain(CoreError::InsufficientStock {
            product_id: "p".into(),
            sku: "MUG".into(),
            available: 1,
            requested: 2,
        }));
        assert_eq!(stock.http_status, 400);
        assert!(stock.retryable.is_none());
        assert!(stock.error.unwrap().contains("MUG"));

        let db = SyncReply::rejected(&SyncError::Database("disk I/O error".into()));
        assert_eq!(db.http_status, 500);
    }
}
