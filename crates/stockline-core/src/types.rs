//! # Domain Types
//!
//! Entities owned by the stock core. Every entity carries its `tenant_id`;
//! all lookups are scoped by it.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  Branch ──1:N──► Product ──1:N──► StockMovement (append-only ledger)   │
//! │                     ▲                                                   │
//! │                     │ product_id                                        │
//! │   ┌─────────────────┼──────────────────┬──────────────────────┐        │
//! │   │                 │                  │                      │        │
//! │  OrderItem    StockTransferItem   PurchaseOrderItem           │        │
//! │   │                 │                  │                      │        │
//! │  Order        StockTransfer       PurchaseOrder ──► Supplier  │        │
//! │  (client_uuid) (client_uuid,       (client_uuid,              │        │
//! │                 reference_id)       reference_id)             │        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! - `id`: UUID v4, server-generated, used for relations
//! - Business id: `sku`, `order_number`, `reference_id` (`TRF-…`, `PO-…`)
//! - Offline-originated rows also keep the terminal's `client_uuid`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Tenant Context
// =============================================================================

/// Who is calling, resolved by the authentication layer before any handler
/// runs. Passed explicitly through every gateway and handler call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TenantContext {
    pub tenant_id: String,

    /// Staff member or device acting on the tenant's behalf.
    pub actor_id: Option<String>,
}

impl TenantContext {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        TenantContext {
            tenant_id: tenant_id.into(),
            actor_id: None,
        }
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// A store location. Products, orders and ledger rows belong to one branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Branch {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Supplier {
    pub id: String,
    pub tenant_id: String,
    pub name: String,

    /// What the tenant still owes this supplier.
    pub outstanding_balance_cents: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CreditTransactionType {
    Purchase,
    Payment,
    Adjustment,
}

/// One change to a supplier's outstanding balance. Positive amounts raise
/// what is owed; payments are negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SupplierCreditTransaction {
    pub id: String,
    pub tenant_id: String,
    pub supplier_id: String,
    pub amount_cents: i64,
    pub transaction_type: CreditTransactionType,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub actor_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Customer {
    pub id: String,
    pub tenant_id: String,
    pub branch_id: Option<String>,
    pub name: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// A product stocked at exactly one branch.
///
/// `stock_quantity` is a cached projection of the ledger: it always equals
/// the sum of the product's `StockMovement::quantity_change` values and is
/// only ever written in the same transaction as the movement that changes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    pub id: String,
    pub tenant_id: String,
    pub branch_id: String,

    /// Matching key across branches (transfer receipt resolves by SKU).
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,

    /// Selling price in cents.
    pub price_cents: i64,

    /// Weighted-average cost in cents.
    pub cost_cents: i64,

    pub stock_quantity: i64,
    pub low_stock_threshold: i64,
    pub is_active: bool,

    /// Sold as its components; its own stock is never touched by a sale.
    pub is_composite: bool,

    /// Bumped on every stock change.
    pub version: i64,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    #[inline]
    pub fn cost(&self) -> Money {
        Money::from_cents(self.cost_cents)
    }

    /// True once stock is at or below the product's threshold.
    pub fn is_low_stock(&self) -> bool {
        self.stock_quantity <= self.low_stock_threshold
    }
}

/// `quantity` units of `component_id` go out per unit of `parent_id` sold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ProductComponent {
    pub id: String,
    pub tenant_id: String,
    pub parent_id: String,
    pub component_id: String,
    pub quantity: i64,
}

// =============================================================================
// Stock Ledger
// =============================================================================

/// What caused a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Sale,
    Return,
    Adjustment,
    Receive,
    TransferIn,
    TransferOut,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Sale => "sale",
            MovementType::Return => "return",
            MovementType::Adjustment => "adjustment",
            MovementType::Receive => "receive",
            MovementType::TransferIn => "transfer_in",
            MovementType::TransferOut => "transfer_out",
        }
    }

    /// Only corrective adjustments may leave a balance below zero.
    pub fn allows_negative_balance(&self) -> bool {
        matches!(self, MovementType::Adjustment)
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable ledger entry.
///
/// ## Balance Invariant
/// Ordered by `seq` for one product:
/// `balance_after[n] == balance_after[n-1] + quantity_change[n]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockMovement {
    /// Insertion order; ties on `created_at` are broken by this.
    pub seq: i64,
    pub id: String,
    pub tenant_id: String,
    pub branch_id: String,
    pub product_id: String,
    pub batch_id: Option<String>,
    pub quantity_change: i64,
    pub balance_after: i64,
    pub movement_type: MovementType,

    /// Order number, transfer reference or PO reference.
    pub reference: String,
    pub notes: Option<String>,
    pub actor_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Stock Transfer
// =============================================================================

/// Transfer lifecycle.
///
/// ```text
/// requested ──► approved ──► shipped ──► completed
///     │             │
///     └──────┬──────┘
///            ▼
///        cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Requested,
    Approved,
    Shipped,
    Completed,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Requested => "requested",
            TransferStatus::Approved => "approved",
            TransferStatus::Shipped => "shipped",
            TransferStatus::Completed => "completed",
            TransferStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Cancelled)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockTransfer {
    pub id: String,
    pub tenant_id: String,
    pub client_uuid: Option<String>,

    /// `TRF-xxxxxxxx`, unique.
    pub reference_id: String,
    pub source_branch_id: String,
    pub destination_branch_id: String,
    pub status: TransferStatus,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,

    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    #[serde(default)]
    pub items: Vec<StockTransferItem>,
}

/// One transfer line. `product_id` is the product in the *source* branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockTransferItem {
    pub id: String,
    pub transfer_id: String,
    pub product_id: String,
    pub quantity: i64,

    /// Unit price charged between branches; becomes the incoming cost.
    pub transfer_price_cents: Option<i64>,
    pub line_no: i64,
}

// =============================================================================
// Purchase Order
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Draft,
    Ordered,
    Received,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "draft",
            PurchaseOrderStatus::Ordered => "ordered",
            PurchaseOrderStatus::Received => "received",
            PurchaseOrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PurchaseOrder {
    pub id: String,
    pub tenant_id: String,
    pub client_uuid: Option<String>,

    /// `PO-xxxxxxxx`, unique.
    pub reference_id: String,
    pub branch_id: String,
    pub supplier_id: String,
    pub status: PurchaseOrderStatus,
    pub total_cost_cents: i64,

    /// Paid up front; the rest is booked as supplier credit.
    pub amount_paid_cents: i64,
    pub payment_method: PaymentMethod,
    pub expected_date: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub received_at: Option<DateTime<Utc>>,

    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    #[serde(default)]
    pub items: Vec<PurchaseOrderItem>,
}

impl PurchaseOrder {
    pub fn total_cost(&self) -> Money {
        Money::from_cents(self.total_cost_cents)
    }

    /// Unpaid part of the total; zero when overpaid.
    pub fn balance_due(&self) -> Money {
        Money::from_cents(self.total_cost_cents.saturating_sub(self.amount_paid_cents).max(0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PurchaseOrderItem {
    pub id: String,
    pub purchase_order_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub unit_cost_cents: i64,

    /// Filled in when the PO is received.
    pub received_quantity: i64,
    pub line_no: i64,
}

// =============================================================================
// Order (sale)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Synced but not yet paid/picked up (kiosk orders). No stock effect.
    Pending,
    /// Stock has been (or is being) deducted.
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an order was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderingType {
    #[default]
    Pos,
    Kiosk,
    Online,
    Mobile,
}

impl OrderingType {
    /// Status an order gets when the terminal does not say.
    ///
    /// Kiosk orders are paid at the counter later, so they arrive pending.
    pub fn default_status(&self) -> OrderStatus {
        match self {
            OrderingType::Kiosk => OrderStatus::Pending,
            _ => OrderStatus::Completed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Cash,
    Card,
    MobileMoney,
    BankTransfer,
    Credit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Order {
    pub id: String,
    pub tenant_id: String,
    pub branch_id: String,
    pub customer_id: Option<String>,
    pub cashier_id: Option<String>,

    /// Identifier chosen by the offline terminal; unique per tenant.
    pub client_uuid: String,
    pub order_number: String,
    pub status: OrderStatus,
    pub ordering_type: OrderingType,
    pub payment_method: PaymentMethod,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,

    /// Set in the same transaction as the sale movements.
    pub stock_deducted: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,

    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    #[serde(default)]
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub price_cents: i64,

    /// Product cost at the time of sale.
    pub cost_price_cents: i64,
    pub line_total_cents: i64,
    pub line_no: i64,
}

// =============================================================================
// Idempotency
// =============================================================================

/// Which entity table an idempotency key resolves into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Order,
    Transfer,
    PurchaseOrder,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Order => "order",
            EntityKind::Transfer => "transfer",
            EntityKind::PurchaseOrder => "purchase_order",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome already recorded for a client transaction id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct IdempotencyRecord {
    pub entity_id: String,

    /// Order number or transfer/PO reference.
    pub reference: String,
    pub client_uuid: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movement_type_wire_names() {
        let json = serde_json::to_string(&MovementType::TransferOut).unwrap();
        assert_eq!(json, "\"transfer_out\"");
        assert_eq!(MovementType::TransferIn.to_string(), "transfer_in");
        assert!(MovementType::Adjustment.allows_negative_balance());
        assert!(!MovementType::Sale.allows_negative_balance());
    }

    #[test]
    fn test_kiosk_orders_default_to_pending() {
        assert_eq!(OrderingType::Kiosk.default_status(), OrderStatus::Pending);
        assert_eq!(OrderingType::Pos.default_status(), OrderStatus::Completed);
        assert_eq!(OrderingType::Online.default_status(), OrderStatus::Completed);
    }

    #[test]
    fn test_transfer_terminal_states() {
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Cancelled.is_terminal());
        assert!(!TransferStatus::Shipped.is_terminal());
    }

    #[test]
    fn test_credit_transaction_wire_names() {
        let json = serde_json::to_string(&CreditTransactionType::Purchase).unwrap();
        assert_eq!(json, "\"purchase\"");
    }

    #[test]
    fn test_tenant_context_builder() {
        let ctx = TenantContext::new("t-1").with_actor("cashier-7");
        assert_eq!(ctx.tenant_id, "t-1");
        assert_eq!(ctx.actor_id.as_deref(), Some("cashier-7"));
    }
}
