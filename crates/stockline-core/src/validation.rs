//! # Payload Checks
//!
//! Shape checks the handlers run before they take locks or open a
//! transaction. Nothing here looks at stock levels.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │               Where a bad envelope gets stopped                         │
//! │                                                                         │
//! │  Layer 1: Envelope decoding (stockline-sync protocol)                  │
//! │  ├── uuid / type / data present                                        │
//! │  └── payload deserializes                                              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── quantities, prices, ids, line counts                              │
//! │  └── tenant-scoped existence checks (handlers, via repositories)        │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: SQLite schema                                                │
//! │  ├── UNIQUE (tenant_id, client_uuid)                                   │
//! │  └── CHECK constraints on the ledger                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::money::Money;
use crate::{MAX_LINE_ITEMS, MAX_LINE_QUANTITY, MAX_PRICE_CENTS};

pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Rejects empty / whitespace-only values.
pub fn validate_required(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates a client-generated UUID.
///
/// ```rust
/// use stockline_core::validation::validate_uuid;
///
/// assert!(validate_uuid("uuid", "550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("uuid", "not-a-uuid").is_err());
/// ```
pub fn validate_uuid(field: &str, id: &str) -> ValidationResult<()> {
    validate_required(field, id)?;

    uuid::Uuid::parse_str(id.trim()).map_err(|_| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "expected a UUID".to_string(),
    })?;

    Ok(())
}

/// Validates a free-text note.
pub fn validate_notes(notes: Option<&str>) -> ValidationResult<()> {
    match notes {
        Some(n) if n.len() > 1000 => Err(ValidationError::TooLong {
            field: "notes".to_string(),
            max: 1000,
        }),
        _ => Ok(()),
    }
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// A line quantity: `1..=MAX_LINE_QUANTITY`.
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a signed stock correction; zero is rejected.
pub fn validate_adjustment(delta: i64) -> ValidationResult<()> {
    if delta == 0 || delta.abs() > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity_change".to_string(),
            min: -MAX_LINE_QUANTITY,
            max: MAX_LINE_QUANTITY,
        });
    }
    Ok(())
}

/// Validates a price or cost in cents: `0..=MAX_PRICE_CENTS`.
///
/// ```rust
/// use stockline_core::validation::validate_price_cents;
///
/// assert!(validate_price_cents("price", 1099).is_ok());
/// assert!(validate_price_cents("price", 0).is_ok());
/// assert!(validate_price_cents("price", -100).is_err());
/// assert!(validate_price_cents("price", i64::MAX).is_err());
/// ```
pub fn validate_price_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if !(0..=MAX_PRICE_CENTS).contains(&cents) {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: MAX_PRICE_CENTS,
        });
    }

    Ok(())
}

/// Sums `unit × quantity` over the lines, failing instead of overflowing.
pub fn checked_line_total(field: &str, lines: impl IntoIterator<Item = (Money, i64)>) -> ValidationResult<Money> {
    let overflow = || ValidationError::OutOfRange {
        field: field.to_string(),
        min: 0,
        max: i64::MAX,
    };

    lines.into_iter().try_fold(Money::zero(), |acc, (unit, qty)| {
        unit.checked_mul(qty)
            .and_then(|line| acc.checked_add(line))
            .ok_or_else(overflow)
    })
}

// =============================================================================
// Collection Validators
// =============================================================================

/// An order, transfer or PO carries between one and `MAX_LINE_ITEMS` lines.
pub fn validate_line_count(count: usize) -> ValidationResult<()> {
    if count == 0 {
        return Err(ValidationError::Required {
            field: "items".to_string(),
        });
    }

    if count > MAX_LINE_ITEMS {
        return Err(ValidationError::OutOfRange {
            field: "items".to_string(),
            min: 1,
            max: MAX_LINE_ITEMS as i64,
        });
    }

    Ok(())
}

/// A transfer must move stock between two different branches.
pub fn validate_branch_pair(source: &str, destination: &str) -> ValidationResult<()> {
    validate_required("source_branch_id", source)?;
    validate_required("destination_branch_id", destination)?;

    if source == destination {
        return Err(ValidationError::MustDiffer {
            field: "destination_branch_id".to_string(),
            other: "source_branch_id".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantity_bounds() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_LINE_QUANTITY).is_ok());
        assert!(matches!(
            validate_quantity(0),
            Err(ValidationError::MustBePositive { .. })
        ));
        assert!(matches!(
            validate_quantity(MAX_LINE_QUANTITY + 1),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_validate_adjustment() {
        assert!(validate_adjustment(-3).is_ok());
        assert!(validate_adjustment(12).is_ok());
        assert!(validate_adjustment(0).is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("uuid", "550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(matches!(
            validate_uuid("uuid", "  "),
            Err(ValidationError::Required { .. })
        ));
        assert!(validate_uuid("uuid", "123").is_err());
    }

    #[test]
    fn test_price_upper_bound() {
        assert!(validate_price_cents("unit_cost_cents", MAX_PRICE_CENTS).is_ok());
        assert!(matches!(
            validate_price_cents("unit_cost_cents", MAX_PRICE_CENTS + 1),
            Err(ValidationError::OutOfRange { max: MAX_PRICE_CENTS, .. })
        ));
    }

    #[test]
    fn test_line_total_overflow_is_rejected() {
        let lines = [(Money::from_cents(250), 4), (Money::from_cents(100), 1)];
        assert_eq!(checked_line_total("subtotal_cents", lines).unwrap().cents(), 1100);

        let huge = [(Money::from_cents(10_000_000_000_000), 1_000_000)];
        assert!(matches!(
            checked_line_total("total_cost_cents", huge),
            Err(ValidationError::OutOfRange { field, .. }) if field == "total_cost_cents"
        ));

        let many = vec![(Money::from_cents(MAX_PRICE_CENTS), MAX_LINE_QUANTITY); MAX_LINE_ITEMS];
        assert!(checked_line_total("subtotal_cents", many).is_err());
    }

    #[test]
    fn test_validate_line_count() {
        assert!(validate_line_count(0).is_err());
        assert!(validate_line_count(1).is_ok());
        assert!(validate_line_count(MAX_LINE_ITEMS + 1).is_err());
    }

    #[test]
    fn test_validate_branch_pair() {
        assert!(validate_branch_pair("a", "b").is_ok());
        assert!(matches!(
            validate_branch_pair("a", "a"),
            Err(ValidationError::MustDiffer { .. })
        ));
        assert!(validate_branch_pair("", "b").is_err());
    }

    #[test]
    fn test_validate_notes() {
        assert!(validate_notes(None).is_ok());
        assert!(validate_notes(Some("fragile")).is_ok());
        assert!(validate_notes(Some(&"x".repeat(1001))).is_err());
    }
}
