//! Money amounts in the smallest currency unit (cents).

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Signed amount in cents.
///
/// Signed so that balances and reversals can be expressed directly; records
/// that require a positive amount validate it on construction.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("amount overflow"))
    }

    pub fn checked_sub(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("amount overflow"))
    }

    /// `self × quantity`, e.g. unit price times line quantity.
    pub fn times(self, quantity: i64) -> DomainResult<Money> {
        self.0
            .checked_mul(quantity)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("amount overflow"))
    }

    /// Fraction of this amount expressed in basis points (1 bp = 0.01 %),
    /// rounded half away from zero to the cent.
    pub fn basis_points(self, bp: u32) -> DomainResult<Money> {
        let scaled = (self.0 as i128)
            .checked_mul(bp as i128)
            .ok_or_else(|| DomainError::invariant("amount overflow"))?;
        let half = if scaled >= 0 { 5_000 } else { -5_000 };
        let rounded = (scaled + half) / 10_000;
        i64::try_from(rounded)
            .map(Money)
            .map_err(|_| DomainError::invariant("amount overflow"))
    }

    /// Amount still owed on `total` after `paid`, never negative.
    pub fn outstanding(total: Money, paid: Money) -> Money {
        Money(total.0.saturating_sub(paid.0).max(0))
    }

    /// Sum amounts with overflow checking.
    pub fn sum<I: IntoIterator<Item = Money>>(items: I) -> DomainResult<Money> {
        items
            .into_iter()
            .try_fold(Money::ZERO, |acc, m| acc.checked_add(m))
    }

    /// Require a strictly positive amount; `what` names the field.
    pub fn ensure_positive(self, what: &str) -> DomainResult<Money> {
        if self.0 <= 0 {
            return Err(DomainError::validation(format!("{what} must be positive")));
        }
        Ok(self)
    }
}

impl core::ops::Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}
