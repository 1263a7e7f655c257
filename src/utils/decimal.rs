//! Decimal arithmetic utilities for share accounting.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Basis points in one whole unit (100%).
pub const BPS_SCALE: Decimal = dec!(10000);

/// Compute `floor(amount * numerator / denominator)`.
///
/// Returns zero when the denominator is zero. All share/asset conversions
/// round down so the ledger never mints value out of rounding.
pub fn floor_mul_div(amount: Decimal, numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        return Decimal::ZERO;
    }
    (amount * numerator / denominator).floor()
}

/// Apply a basis-point ratio to an amount, flooring the result.
pub fn apply_bps(amount: Decimal, bps: u32) -> Decimal {
    floor_mul_div(amount, Decimal::from(bps), BPS_SCALE)
}

/// Convert a decimal rate to basis points (1 bp = 0.01%).
pub fn to_basis_points(rate: Decimal) -> Decimal {
    rate * BPS_SCALE
}

/// Convert basis points to a decimal rate.
pub fn from_basis_points(bps: Decimal) -> Decimal {
    bps / BPS_SCALE
}

/// Safe division that returns zero if the divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Calculate a weighted average over `(value, weight)` pairs.
pub fn weighted_average(values: &[(Decimal, Decimal)]) -> Decimal {
    let (sum, weight_sum) = values.iter().fold(
        (Decimal::ZERO, Decimal::ZERO),
        |(sum, weight_sum), (val, weight)| (sum + val * weight, weight_sum + weight),
    );

    safe_div(sum, weight_sum)
}
