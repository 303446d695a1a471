//! Collection charges.
//!
//! A mobile-money collection is charged progressively: each tier's rate
//! applies only to the slice of the amount that falls inside the tier.
//! Amounts above [`FLAT_CHARGE_THRESHOLD`] pay [`FLAT_CHARGE_RATE`] on the
//! whole amount instead. Charges are rounded up to the cent.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::money::MONEY_SCALE;

/// One slice of the progressive charge table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeTier {
    /// Exclusive lower bound of the slice.
    pub lower: Decimal,
    /// Inclusive upper bound of the slice.
    pub upper: Decimal,
    /// Rate applied to the part of the amount inside the slice.
    pub rate: Decimal,
}

const fn tier(lower: u32, upper: u32, rate_mantissa: u32, rate_scale: u32) -> ChargeTier {
    ChargeTier {
        lower: Decimal::from_parts(lower, 0, 0, false, 0),
        upper: Decimal::from_parts(upper, 0, 0, false, 0),
        rate: Decimal::from_parts(rate_mantissa, 0, 0, false, rate_scale),
    }
}

/// Progressive charge table.
pub const CHARGE_TIERS: [ChargeTier; 7] = [
    tier(0, 1_000, 5, 3),
    tier(1_001, 10_000, 1, 2),
    tier(10_001, 100_000, 15, 3),
    tier(100_001, 500_000, 2, 2),
    tier(500_001, 1_000_000, 25, 3),
    tier(1_000_001, 5_000_000, 3, 2),
    tier(5_000_001, 10_000_000, 4, 2),
];

/// Amounts above this pay the flat rate.
pub const FLAT_CHARGE_THRESHOLD: Decimal = Decimal::from_parts(10_000_000, 0, 0, false, 0);

/// Rate for amounts above [`FLAT_CHARGE_THRESHOLD`].
pub const FLAT_CHARGE_RATE: Decimal = Decimal::from_parts(5, 0, 0, false, 2);

/// Charge for collecting `amount`. Zero and negative amounts cost nothing.
#[must_use]
pub fn collection_charge(amount: Decimal) -> Decimal {
    if amount <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let raw = if amount > FLAT_CHARGE_THRESHOLD {
        amount * FLAT_CHARGE_RATE
    } else {
        CHARGE_TIERS
            .iter()
            .filter(|t| amount > t.lower)
            .map(|t| (amount.min(t.upper) - t.lower) * t.rate)
            .sum::<Decimal>()
    };
    raw.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::AwayFromZero)
}
