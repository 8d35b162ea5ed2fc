//! Monetary amounts in minor units.
//!
//! Orders carry their ISO currency separately, so `Money` is just a signed
//! count of minor units (cents). Account deltas can be negative; prices and
//! balances are validated non-negative where they are stored.

use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn zero() -> Self {
        Self(0)
    }

    pub const fn cents(&self) -> i64 {
        self.0
    }

    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Price of `quantity` units, `None` on overflow.
    pub fn checked_multiply(self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(i64::from(quantity)).map(Money)
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    /// `self - other`, floored at zero.
    pub fn saturating_less(self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0).max(0))
    }
}

/// Renders as major units with two decimals, e.g. `7.00` or `-12.34`.
impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_major_units() {
        assert_eq!(Money::from_cents(700).to_string(), "7.00");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-1234).to_string(), "-12.34");
    }

    #[test]
    fn checked_line_total() {
        let line = Money::from_cents(700).checked_multiply(2).unwrap();
        assert_eq!(line.checked_add(Money::from_cents(150)).unwrap().cents(), 1550);
    }

    #[test]
    fn checked_ops_detect_overflow() {
        assert!(Money::from_cents(1 << 62).checked_multiply(4).is_none());
        assert!(Money::from_cents(i64::MAX).checked_add(Money::from_cents(1)).is_none());
    }

    #[test]
    fn saturating_less_floors_at_zero() {
        let amount = Money::from_cents(700);
        assert_eq!(amount.saturating_less(Money::from_cents(200)).cents(), 500);
        assert!(amount.saturating_less(Money::from_cents(900)).is_zero());
    }

    #[test]
    fn negation_and_assign_ops() {
        let mut balance = Money::from_cents(1000);
        balance -= Money::from_cents(300);
        balance += -Money::from_cents(200);
        assert_eq!(balance.cents(), 500);
        assert!((-balance).is_negative());
    }

    #[test]
    fn serializes_as_plain_cents() {
        let json = serde_json::to_string(&Money::from_cents(700)).unwrap();
        assert_eq!(json, "700");
        let back: Money = serde_json::from_str("700").unwrap();
        assert_eq!(back, Money::from_cents(700));
    }
}
