use serde::{Deserialize, Serialize};

use pelleterp_core::{AggregateId, DomainError, DomainResult};

/// What caused a quantity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Initial quantity given when the item was created.
    Opening,
    Adjustment,
    Purchase,
    PurchaseReversal,
    Consumption,
    ConsumptionReversal,
    Production,
    ProductionReversal,
    Sale,
    SaleReversal,
}

impl MovementKind {
    /// Required sign of the delta (`None` = either).
    fn required_sign(self) -> Option<i64> {
        match self {
            MovementKind::Opening
            | MovementKind::Purchase
            | MovementKind::ConsumptionReversal
            | MovementKind::Production
            | MovementKind::SaleReversal => Some(1),
            MovementKind::PurchaseReversal
            | MovementKind::Consumption
            | MovementKind::ProductionReversal
            | MovementKind::Sale => Some(-1),
            MovementKind::Adjustment => None,
        }
    }

    pub fn check_delta(self, delta: i64) -> DomainResult<()> {
        match self.required_sign() {
            Some(sign) if delta.signum() != sign => Err(DomainError::invariant(format!(
                "{self:?} movement cannot have delta {delta}"
            ))),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Invoice,
    Sale,
    Production,
    Manual,
}

/// Record that originated a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MovementSource {
    pub kind: SourceKind,
    pub id: Option<AggregateId>,
}

impl MovementSource {
    pub fn manual() -> Self {
        Self {
            kind: SourceKind::Manual,
            id: None,
        }
    }

    pub fn invoice(id: AggregateId) -> Self {
        Self {
            kind: SourceKind::Invoice,
            id: Some(id),
        }
    }

    pub fn sale(id: AggregateId) -> Self {
        Self {
            kind: SourceKind::Sale,
            id: Some(id),
        }
    }

    pub fn production(id: AggregateId) -> Self {
        Self {
            kind: SourceKind::Production,
            id: Some(id),
        }
    }

    pub fn is(&self, kind: SourceKind, id: AggregateId) -> bool {
        self.kind == kind && self.id == Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signs_are_enforced_per_kind() {
        assert!(MovementKind::Sale.check_delta(-5).is_ok());
        assert!(MovementKind::Sale.check_delta(5).is_err());
        assert!(MovementKind::Purchase.check_delta(5).is_ok());
        assert!(MovementKind::Adjustment.check_delta(-5).is_ok());
        assert!(MovementKind::Adjustment.check_delta(5).is_ok());
    }
}
