//! # Workflow Transitions
//!
//! Pure transition rules for the three workflows that mutate the ledger.
//! Handlers ask the entity for a [`Transition`] before touching anything;
//! an `Err` means the call has no side effect at all.
//!
//! ## Idempotent Transitions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  current state vs. target                                               │
//! │                                                                         │
//! │  one step before target   → Transition::Apply                          │
//! │  already at / past target → Transition::AlreadyApplied (no-op success) │
//! │  anything else            → CoreError::InvalidTransition               │
//! │                                                                         │
//! │  Exception: receiving a purchase order twice is AlreadyReceived,       │
//! │  never a silent no-op.                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{CoreError, CoreResult};
use crate::types::{Order, OrderStatus, PurchaseOrder, PurchaseOrderStatus, StockTransfer, TransferStatus};

/// What a handler should do for a requested transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Perform the transition and its side effects.
    Apply,
    /// The entity is already in (or past) the target state.
    AlreadyApplied,
}

impl Transition {
    pub fn is_apply(&self) -> bool {
        matches!(self, Transition::Apply)
    }
}

fn invalid(entity: &str, id: &str, current: &str, attempted: &str) -> CoreError {
    CoreError::InvalidTransition {
        entity: entity.to_string(),
        id: id.to_string(),
        current: current.to_string(),
        attempted: attempted.to_string(),
    }
}

// =============================================================================
// Stock Transfer
// =============================================================================

impl TransferStatus {
    /// Position along the forward path; `None` for cancelled.
    fn progress(&self) -> Option<u8> {
        match self {
            TransferStatus::Requested => Some(0),
            TransferStatus::Approved => Some(1),
            TransferStatus::Shipped => Some(2),
            TransferStatus::Completed => Some(3),
            TransferStatus::Cancelled => None,
        }
    }

    /// Decides a transition from `self` to `target`.
    ///
    /// The error carries `(current, attempted)`; [`StockTransfer::plan`]
    /// turns it into a `CoreError` naming the transfer.
    pub fn plan(&self, target: TransferStatus) -> Result<Transition, (TransferStatus, TransferStatus)> {
        if target == TransferStatus::Cancelled {
            return match self {
                TransferStatus::Cancelled => Ok(Transition::AlreadyApplied),
                TransferStatus::Requested | TransferStatus::Approved => Ok(Transition::Apply),
                _ => Err((*self, target)),
            };
        }

        match (self.progress(), target.progress()) {
            (Some(current), Some(wanted)) if current >= wanted => Ok(Transition::AlreadyApplied),
            (Some(current), Some(wanted)) if current + 1 == wanted => Ok(Transition::Apply),
            _ => Err((*self, target)),
        }
    }
}

impl StockTransfer {
    /// Checks whether this transfer may move to `target`.
    pub fn plan(&self, target: TransferStatus) -> CoreResult<Transition> {
        self.status.plan(target).map_err(|(current, attempted)| {
            invalid("transfer", &self.reference_id, current.as_str(), attempted.as_str())
        })
    }
}

// =============================================================================
// Purchase Order
// =============================================================================

impl PurchaseOrder {
    /// Receiving is legal only from `ordered`.
    pub fn plan_receive(&self) -> CoreResult<()> {
        match self.status {
            PurchaseOrderStatus::Ordered => Ok(()),
            PurchaseOrderStatus::Received => Err(CoreError::AlreadyReceived {
                reference: self.reference_id.clone(),
            }),
            other => Err(invalid(
                "purchase order",
                &self.reference_id,
                other.as_str(),
                PurchaseOrderStatus::Received.as_str(),
            )),
        }
    }

    pub fn plan_cancel(&self) -> CoreResult<Transition> {
        match self.status {
            PurchaseOrderStatus::Draft | PurchaseOrderStatus::Ordered => Ok(Transition::Apply),
            PurchaseOrderStatus::Cancelled => Ok(Transition::AlreadyApplied),
            PurchaseOrderStatus::Received => Err(invalid(
                "purchase order",
                &self.reference_id,
                PurchaseOrderStatus::Received.as_str(),
                PurchaseOrderStatus::Cancelled.as_str(),
            )),
        }
    }
}

// =============================================================================
// Order
// =============================================================================

impl Order {
    /// Finalizing a pending order.
    pub fn plan_complete(&self) -> CoreResult<Transition> {
        match self.status {
            OrderStatus::Pending => Ok(Transition::Apply),
            OrderStatus::Completed => Ok(Transition::AlreadyApplied),
            OrderStatus::Cancelled => Err(invalid(
                "order",
                &self.order_number,
                OrderStatus::Cancelled.as_str(),
                OrderStatus::Completed.as_str(),
            )),
        }
    }

    pub fn plan_void(&self) -> Transition {
        match self.status {
            OrderStatus::Cancelled => Transition::AlreadyApplied,
            OrderStatus::Pending | OrderStatus::Completed => Transition::Apply,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::types::TransferStatus::*;

    fn transfer(status: TransferStatus) -> StockTransfer {
        StockTransfer {
            id: "t-1".into(),
            tenant_id: "tenant".into(),
            client_uuid: None,
            reference_id: "TRF-00000001".into(),
            source_branch_id: "a".into(),
            destination_branch_id: "b".into(),
            status,
            notes: None,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
            items: vec![],
        }
    }

    fn purchase_order(status: PurchaseOrderStatus) -> PurchaseOrder {
        PurchaseOrder {
            id: "po-1".into(),
            tenant_id: "tenant".into(),
            client_uuid: None,
            reference_id: "PO-00000001".into(),
            branch_id: "a".into(),
            supplier_id: "s".into(),
            status,
            total_cost_cents: 0,
            amount_paid_cents: 0,
            payment_method: crate::types::PaymentMethod::Cash,
            expected_date: None,
            notes: None,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            received_at: None,
            items: vec![],
        }
    }

    #[test]
    fn test_forward_path_applies_one_step_at_a_time() {
        assert_eq!(Requested.plan(Approved), Ok(Transition::Apply));
        assert_eq!(Approved.plan(Shipped), Ok(Transition::Apply));
        assert_eq!(Shipped.plan(Completed), Ok(Transition::Apply));
    }

    #[test]
    fn test_repeated_transition_is_noop() {
        assert_eq!(Approved.plan(Approved), Ok(Transition::AlreadyApplied));
        assert_eq!(Completed.plan(Shipped), Ok(Transition::AlreadyApplied));
        assert_eq!(Shipped.plan(Approved), Ok(Transition::AlreadyApplied));
        assert_eq!(Cancelled.plan(Cancelled), Ok(Transition::AlreadyApplied));
    }

    #[test]
    fn test_skipping_a_step_is_rejected() {
        let err = transfer(Requested).plan(Shipped).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidTransition { ref current, ref attempted, .. }
                if current == "requested" && attempted == "shipped"
        ));
        assert!(transfer(Approved).plan(Completed).is_err());
    }

    #[test]
    fn test_cancel_rules() {
        assert_eq!(Requested.plan(Cancelled), Ok(Transition::Apply));
        assert_eq!(Approved.plan(Cancelled), Ok(Transition::Apply));
        assert!(Shipped.plan(Cancelled).is_err());
        assert!(Completed.plan(Cancelled).is_err());
        assert!(Cancelled.plan(Approved).is_err());
        assert!(Cancelled.plan(Shipped).is_err());
    }

    #[test]
    fn test_purchase_order_receive_rules() {
        assert!(purchase_order(PurchaseOrderStatus::Ordered).plan_receive().is_ok());
        assert!(matches!(
            purchase_order(PurchaseOrderStatus::Received).plan_receive(),
            Err(CoreError::AlreadyReceived { .. })
        ));
        assert!(matches!(
            purchase_order(PurchaseOrderStatus::Draft).plan_receive(),
            Err(CoreError::InvalidTransition { .. })
        ));
        assert!(purchase_order(PurchaseOrderStatus::Received).plan_cancel().is_err());
        assert_eq!(
            purchase_order(PurchaseOrderStatus::Cancelled).plan_cancel(),
            Ok(Transition::AlreadyApplied)
        );
    }
}
