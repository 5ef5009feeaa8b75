//! Human-readable reference ids.
//!
//! Ledger rows carry these strings in their `reference` column so that an
//! audit query can cross-link every movement to the order, transfer or
//! purchase order that produced it.

use uuid::Uuid;

/// Prefix for stock transfer references (`TRF-0A1B2C3D`).
pub const TRANSFER_PREFIX: &str = "TRF";

/// Prefix for purchase order references (`PO-0A1B2C3D`).
pub const PURCHASE_ORDER_PREFIX: &str = "PO";

/// Prefix for server-assigned order numbers (`ORD-000042`).
pub const ORDER_PREFIX: &str = "ORD";

/// Generates `<prefix>-<8 uppercase hex chars>` from a fresh UUID v4.
pub fn generate(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, hex[..8].to_uppercase())
}

pub fn transfer_reference() -> String {
    generate(TRANSFER_PREFIX)
}

pub fn purchase_order_reference() -> String {
    generate(PURCHASE_ORDER_PREFIX)
}

/// Formats the n-th order number of a tenant.
///
/// ```rust
/// assert_eq!(stockline_core::reference::order_number(42), "ORD-000042");
/// ```
pub fn order_number(seq: i64) -> String {
    format!("{}-{:06}", ORDER_PREFIX, seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_reference_format() {
        let reference = transfer_reference();
        assert_eq!(reference.len(), 12);
        assert!(reference.starts_with("TRF-"));
        assert!(reference[4..]
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn test_references_are_distinct() {
        assert_ne!(purchase_order_reference(), purchase_order_reference());
    }

    #[test]
    fn test_order_number_padding() {
        assert_eq!(order_number(1), "ORD-000001");
        assert_eq!(order_number(1_234_567), "ORD-1234567");
    }
}
