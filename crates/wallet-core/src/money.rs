//! Decimal helpers for monetary amounts.
//!
//! All balances are [`Decimal`] values with two fractional digits. Amounts
//! entering the ledger are validated with [`validate_amount`] and rounded with
//! [`round_money`].

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{Result, WalletError};

/// Largest amount accepted for a single movement.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Tolerance used when comparing balances (one cent).
pub const BALANCE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Number of fractional digits carried by every balance.
pub const MONEY_SCALE: u32 = 2;

/// Round an amount to two decimal places, midpoint away from zero.
#[must_use]
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Validate an externally supplied amount.
///
/// # Errors
///
/// Returns `WalletError::InvalidAmount` if the amount is zero or negative, has
/// more than two decimal places, or exceeds [`MAX_AMOUNT`].
pub fn validate_amount(amount: Decimal) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(WalletError::InvalidAmount(
            "amount must be greater than zero".into(),
        ));
    }
    if amount.normalize().scale() > MONEY_SCALE {
        return Err(WalletError::InvalidAmount(
            "amount cannot have more than 2 decimal places".into(),
        ));
    }
    if amount > MAX_AMOUNT {
        return Err(WalletError::InvalidAmount(format!(
            "amount cannot exceed {MAX_AMOUNT}"
        )));
    }
    Ok(round_money(amount))
}

/// Whether two balances are equal within [`BALANCE_TOLERANCE`].
#[must_use]
pub fn approx_eq(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() <= BALANCE_TOLERANCE
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_money(dec!(10.005)), dec!(10.01));
        assert_eq!(round_money(dec!(10.004)), dec!(10.00));
    }

    #[test]
    fn validates_amounts() {
        assert_eq!(validate_amount(dec!(12.50)).unwrap(), dec!(12.50));
        assert_eq!(validate_amount(dec!(1000000)).unwrap(), dec!(1000000));
        assert!(validate_amount(Decimal::ZERO).is_err());
        assert!(validate_amount(dec!(-1)).is_err());
        assert!(validate_amount(dec!(1.001)).is_err());
        assert!(validate_amount(dec!(1000000.01)).is_err());
    }

    #[test]
    fn trailing_zeros_do_not_count_as_precision() {
        assert!(validate_amount(dec!(5.1000)).is_ok());
    }

    #[test]
    fn tolerance_is_one_cent() {
        assert!(approx_eq(dec!(100.00), dec!(100.01)));
        assert!(!approx_eq(dec!(100.00), dec!(100.02)));
    }
}
