//! # stockline-core: Pure Business Logic for Stockline
//!
//! Domain types and rules shared by the ledger, the workflow handlers and
//! the sync gateway. Nothing in here touches a database or a socket.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockline Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Offline terminals (POS, kiosk, mobile)             │   │
//! │  │        replay {uuid, type, data} envelopes when online          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ HTTP                                   │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │         stockline-sync (gateway, handlers, stock locks)         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ stockline-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ workflow  │  │  costing  │  │ validation│  │   │
//! │  │   │ Product   │  │ Transfer  │  │ weighted  │  │   rules   │  │   │
//! │  │   │ Movement  │  │ PO, Order │  │ average   │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 stockline-db (Database Layer)                   │   │
//! │  │          SQLite schema, stock ledger, repositories              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain entities (Product, StockMovement, StockTransfer, ...)
//! - [`workflow`] - Status transition rules for transfers, POs and orders
//! - [`costing`] - Weighted-average cost recomputation
//! - [`money`] - Money type with integer arithmetic
//! - [`reference`] - Human-readable reference ids (`TRF-…`, `PO-…`, `ORD-…`)
//! - [`validation`] - Input validation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use stockline_core::costing::weighted_average_cost;
//! use stockline_core::money::Money;
//!
//! // 10 on hand at 5.00, 10 received at 6.00
//! let cost = weighted_average_cost(10, Money::from_cents(500), 10, Money::from_cents(600));
//! assert_eq!(cost.cents(), 550);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod costing;
pub mod error;
pub mod money;
pub mod reference;
pub mod types;
pub mod validation;
pub mod workflow;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;
pub use workflow::Transition;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum line items accepted in one order, transfer or purchase order.
pub const MAX_LINE_ITEMS: usize = 500;

/// Maximum quantity on a single line.
///
/// ## Business Reason
/// Catches fat-finger entries (an extra zero or three) coming from terminals
/// before they reach the ledger.
pub const MAX_LINE_QUANTITY: i64 = 1_000_000;

/// Largest unit price, cost or order amount accepted, in cents.
pub const MAX_PRICE_CENTS: i64 = 100_000_000_000;

/// Low-stock threshold given to products that do not set their own.
pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 10;
