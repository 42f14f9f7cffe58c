// 🔢 Numeric helpers
// Rounding, tolerances and argument checks shared by the rate allocator
// and the settlement calculator.

use crate::error::{SettleError, SettleResult};

/// Rank tag of a member. Positive, no fixed upper bound.
pub type Rank = i64;

/// Currency amount in the smallest unit (yen, cents, ...)
pub type Amount = i64;

/// A complete rate set adds up to this many percent
pub const FULL_ALLOCATION: f64 = 100.0;

/// Accepted distance from 100% when a rate set is committed
pub const RATE_SUM_TOLERANCE: f64 = 1e-6;

/// Round half up to the nearest currency unit: 2.5 → 3, -2.5 → -2.
///
/// Settlement amounts have always been rounded this way, so negative
/// balances at exactly .5 move toward zero.
pub fn round_half_up(value: f64) -> Amount {
    (value + 0.5).floor() as Amount
}

pub fn approx_eq(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance
}

/// True when `total` is a complete allocation (100% within tolerance)
pub fn is_full_allocation(total: f64) -> bool {
    approx_eq(total, FULL_ALLOCATION, RATE_SUM_TOLERANCE)
}

pub fn ensure_rank(rank: Rank) -> SettleResult<()> {
    if rank <= 0 {
        return Err(SettleError::invalid(format!(
            "rank must be a positive integer, got {}",
            rank
        )));
    }
    Ok(())
}

pub fn ensure_amount(amount: Amount) -> SettleResult<()> {
    if amount < 0 {
        return Err(SettleError::invalid(format!(
            "amount must not be negative, got {}",
            amount
        )));
    }
    Ok(())
}

/// A rate must be finite and non-negative. The upper bound is checked
/// separately because an interactive edit clamps instead of rejecting.
pub fn ensure_rate(rank: Rank, rate: f64) -> SettleResult<()> {
    if !rate.is_finite() {
        return Err(SettleError::invalid(format!(
            "rate for rank {} is not a finite number",
            rank
        )));
    }
    if rate < 0.0 {
        return Err(SettleError::invalid(format!(
            "rate for rank {} must not be negative, got {}",
            rank, rate
        )));
    }
    Ok(())
}
