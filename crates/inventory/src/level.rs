use serde::{Deserialize, Serialize};

use pelleterp_core::{DomainError, DomainResult};

/// Unit an item is counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    #[default]
    Kg,
    Bag,
    Unit,
    Roll,
    Ton,
}

impl Unit {
    /// `quantity` expressed in kilograms, for mass units only.
    pub fn kilograms(self, quantity: i64) -> Option<i64> {
        match self {
            Unit::Kg => Some(quantity),
            Unit::Ton => quantity.checked_mul(1_000),
            Unit::Bag | Unit::Unit | Unit::Roll => None,
        }
    }
}

/// Quantity on hand plus its low-stock threshold.
///
/// Invariant: `quantity >= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Level {
    quantity: i64,
    min_quantity: i64,
}

impl Level {
    pub fn new(quantity: i64, min_quantity: i64) -> DomainResult<Self> {
        if quantity < 0 {
            return Err(DomainError::validation("quantity must not be negative"));
        }
        if min_quantity < 0 {
            return Err(DomainError::validation("minimum quantity must not be negative"));
        }
        Ok(Self {
            quantity,
            min_quantity,
        })
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn min_quantity(&self) -> i64 {
        self.min_quantity
    }

    pub fn set_min_quantity(&mut self, min_quantity: i64) -> DomainResult<()> {
        if min_quantity < 0 {
            return Err(DomainError::validation("minimum quantity must not be negative"));
        }
        self.min_quantity = min_quantity;
        Ok(())
    }

    pub fn is_low(&self) -> bool {
        self.quantity <= self.min_quantity
    }

    /// Apply a signed delta; `what` names the item in error messages.
    /// Returns the new quantity.
    pub fn apply(&mut self, delta: i64, what: &str) -> DomainResult<i64> {
        if delta == 0 {
            return Err(DomainError::validation("quantity change must not be zero"));
        }
        let next = self
            .quantity
            .checked_add(delta)
            .ok_or_else(|| DomainError::invariant("quantity overflow"))?;
        if next < 0 {
            return Err(DomainError::invariant(format!(
                "insufficient quantity of {what} (available {}, requested {})",
                self.quantity, -delta
            )));
        }
        self.quantity = next;
        Ok(next)
    }

    /// Replace the quantity with a value rebuilt from the movement ledger.
    pub(crate) fn reset(&mut self, quantity: i64, what: &str) -> DomainResult<()> {
        if quantity < 0 {
            return Err(DomainError::invariant(format!(
                "movement ledger of {what} sums to a negative quantity ({quantity})"
            )));
        }
        self.quantity = quantity;
        Ok(())
    }
}
