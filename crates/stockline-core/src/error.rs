//! # Error Types
//!
//! Domain-specific error types for stockline-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Where each error is raised                          │
//! │                                                                         │
//! │  stockline-core errors (this file)                                     │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Payload field rejected                         │
//! │                                                                         │
//! │  stockline-db errors                                                   │
//! │  └── DbError          - Database failures (wraps CoreError)            │
//! │                                                                         │
//! │  stockline-sync errors                                                 │
//! │  └── SyncError        - What the gateway maps to a response            │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → SyncError → Response    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Why the stock core refused an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A referenced entity does not exist for the calling tenant.
    ///
    /// ## When This Occurs
    /// - Unknown product, branch, supplier or customer id in a payload
    /// - An id that belongs to another tenant (lookups are tenant-scoped)
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A stock deduction would take a balance below zero.
    ///
    /// ## When This Occurs
    /// ```text
    /// Ledger record (-5, 'sale')
    ///      │
    ///      ▼
    /// Balance in branch: 3
    ///      │
    ///      ▼
    /// InsufficientStock { sku: "COKE-330", available: 3, requested: 5 }
    /// ```
    #[error("Insufficient stock for {sku} ({product_id}): available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        sku: String,
        available: i64,
        requested: i64,
    },

    /// A ledger entry was asked to change stock by zero.
    #[error("Invalid quantity change of 0 for product {product_id}")]
    InvalidQuantity { product_id: String },

    /// The entity is not in a state that permits the requested transition.
    #[error("Invalid transition for {entity} {id}: cannot move from {current} to {attempted}")]
    InvalidTransition {
        entity: String,
        id: String,
        current: String,
        attempted: String,
    },

    /// A purchase order has already been received.
    ///
    /// Receiving is not keyed per line, so a second receive is refused
    /// instead of being treated as a no-op.
    #[error("Purchase order {reference} has already been received")]
    AlreadyReceived { reference: String },

    /// A payload field failed validation.
    #[error("Invalid payload: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Returns true for errors caused by the caller's input rather than by
    /// the current state of the stock.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CoreError::NotFound { .. } | CoreError::InvalidQuantity { .. } | CoreError::Validation(_)
        )
    }

    /// Returns true for business-rule rejections (the request was well formed
    /// but the current state forbids it).
    pub fn is_business_rule(&self) -> bool {
        matches!(
            self,
            CoreError::InsufficientStock { .. }
                | CoreError::InvalidTransition { .. }
                | CoreError::AlreadyReceived { .. }
        )
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// A payload field the gateway refused before any stock was touched.
///
/// `field` is the payload key as the terminal sent it (`items[2].quantity`,
/// `destination_branch_id`), so rejected replies point at the offending value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing {field}")]
    Required { field: String },

    #[error("{field} exceeds {max} characters")]
    TooLong { field: String, max: usize },

    #[error("{field} outside {min}..={max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Quantities and counts of zero or less.
    #[error("{field} must be greater than zero")]
    MustBePositive { field: String },

    /// Not a UUID, not an RFC 3339 timestamp, unknown enum value.
    #[error("{field} is malformed: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Transfer source and destination name the same branch.
    #[error("{field} must differ from {other}")]
    MustDiffer { field: String, other: String },
}

pub type CoreResult<T> = Result<T, CoreError>;
