//! # Costing
//!
//! Weighted-average cost recomputation applied when stock arrives with a
//! known unit cost (purchase-order receipt, inbound transfer).
//!
//! ```text
//!              old_qty × old_cost  +  recv_qty × recv_cost
//! new_cost = ───────────────────────────────────────────────
//!                        old_qty  +  recv_qty
//! ```
//!
//! Negative on-hand quantities (possible after a corrective adjustment)
//! carry no cost basis and are weighted as zero, so a receipt that only
//! brings stock back from -5 to 0 still sets the cost to the incoming cost.
//! Results are rounded half away from zero to the nearest cent.

use crate::money::Money;

/// Recomputes a product's unit cost after receiving `recv_qty` units at
/// `recv_cost`.
///
/// Returns `old_cost` unchanged when the weighted quantity is zero.
///
/// ```rust
/// use stockline_core::costing::weighted_average_cost;
/// use stockline_core::money::Money;
///
/// let new_cost = weighted_average_cost(10, Money::from_cents(500), 10, Money::from_cents(600));
/// assert_eq!(new_cost, Money::from_cents(550));
/// ```
pub fn weighted_average_cost(old_qty: i64, old_cost: Money, recv_qty: i64, recv_cost: Money) -> Money {
    let old_qty = i128::from(old_qty.max(0));
    let recv_qty = i128::from(recv_qty);
    let total_qty = old_qty + recv_qty;

    if total_qty <= 0 {
        return old_cost;
    }

    let numerator = old_qty * i128::from(old_cost.cents()) + recv_qty * i128::from(recv_cost.cents());
    let rounded = div_round_half_away(numerator, total_qty);

    i64::try_from(rounded).map(Money::from_cents).unwrap_or(old_cost)
}

fn div_round_half_away(numerator: i128, denominator: i128) -> i128 {
    let half = denominator / 2;
    if numerator >= 0 {
        (numerator + half) / denominator
    } else {
        (numerator - half) / denominator
    }
}
