//! Production supplies: raw material rolls, empty bags, additives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pelleterp_core::{DomainError, DomainResult, Money, entity_id, impl_document};

use crate::level::{Level, Unit};
use crate::movement::{MovementKind, MovementSource};

entity_id!(SupplyId, "supply id");
entity_id!(SupplyMovementId, "supply movement id");

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NewSupply {
    pub name: String,
    #[serde(default)]
    pub unit: Unit,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub min_quantity: i64,
    /// Last known purchase cost per unit.
    #[serde(default)]
    pub unit_cost: Option<Money>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SupplyPatch {
    pub name: Option<String>,
    pub unit: Option<Unit>,
    pub min_quantity: Option<i64>,
    pub unit_cost: Option<Money>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyStock {
    pub id: SupplyId,
    pub name: String,
    pub unit: Unit,
    #[serde(flatten)]
    level: Level,
    pub unit_cost: Option<Money>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl_document!(SupplyStock, "supplies");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyMovement {
    pub id: SupplyMovementId,
    pub supply_id: SupplyId,
    pub kind: MovementKind,
    pub delta: i64,
    pub balance_after: i64,
    pub source: MovementSource,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl_document!(SupplyMovement, "supply_movements");

impl SupplyStock {
    pub fn create(
        input: NewSupply,
        now: DateTime<Utc>,
    ) -> DomainResult<(Self, Option<SupplyMovement>)> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::validation("name is required"));
        }
        if let Some(cost) = input.unit_cost {
            cost.ensure_positive("unit cost")?;
        }
        let mut supply = Self {
            id: SupplyId::new(),
            name,
            unit: input.unit,
            level: Level::new(0, input.min_quantity)?,
            unit_cost: input.unit_cost,
            active: true,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        let opening = match input.quantity {
            0 => None,
            q if q < 0 => return Err(DomainError::validation("quantity must not be negative")),
            q => Some(supply.apply(q, MovementKind::Opening, MovementSource::manual(), None, now)?),
        };
        Ok((supply, opening))
    }

    pub fn quantity(&self) -> i64 {
        self.level.quantity()
    }

    pub fn min_quantity(&self) -> i64 {
        self.level.min_quantity()
    }

    pub fn is_low(&self) -> bool {
        self.level.is_low()
    }

    pub fn apply_patch(&mut self, patch: SupplyPatch, now: DateTime<Utc>) -> DomainResult<()> {
        if let Some(name) = patch.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(DomainError::validation("name is required"));
            }
            self.name = name;
        }
        if let Some(unit) = patch.unit {
            self.unit = unit;
        }
        if let Some(min) = patch.min_quantity {
            self.level.set_min_quantity(min)?;
        }
        if let Some(cost) = patch.unit_cost {
            self.unit_cost = Some(cost.ensure_positive("unit cost")?);
        }
        if let Some(active) = patch.active {
            self.active = active;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn apply(
        &mut self,
        delta: i64,
        kind: MovementKind,
        source: MovementSource,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> DomainResult<SupplyMovement> {
        kind.check_delta(delta)?;
        let balance_after = self.level.apply(delta, &self.name)?;
        self.updated_at = at;
        Ok(SupplyMovement {
            id: SupplyMovementId::new(),
            supply_id: self.id,
            kind,
            delta,
            balance_after,
            source,
            note,
            at,
            version: 0,
        })
    }

    /// Take back the effect of a movement that is being deleted (no new
    /// movement is recorded, the ledger loses the original one).
    pub fn revert_movement(&mut self, movement: &SupplyMovement, at: DateTime<Utc>) -> DomainResult<i64> {
        if movement.supply_id != self.id {
            return Err(DomainError::invariant(format!(
                "movement {} does not belong to supply {}",
                movement.id, self.id
            )));
        }
        let balance = self.level.apply(-movement.delta, &self.name)?;
        self.updated_at = at;
        Ok(balance)
    }

    pub fn rebuild_from(&mut self, movements: &[SupplyMovement]) -> DomainResult<Option<i64>> {
        let total: i64 = movements
            .iter()
            .filter(|m| m.supply_id == self.id)
            .map(|m| m.delta)
            .sum();
        if total == self.quantity() {
            return Ok(None);
        }
        let previous = self.quantity();
        self.level.reset(total, &self.name)?;
        Ok(Some(previous))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pelleterp_core::AggregateId;

    #[test]
    fn purchase_then_consumption() {
        let now = Utc::now();
        let (mut rolls, opening) = SupplyStock::create(
            NewSupply {
                name: "Rollo de alfalfa".to_string(),
                unit: Unit::Roll,
                ..Default::default()
            },
            now,
        )
        .unwrap();
        assert!(opening.is_none());

        let invoice = AggregateId::new();
        let bought = rolls
            .apply(12, MovementKind::Purchase, MovementSource::invoice(invoice), None, now)
            .unwrap();
        assert!(bought.source.is(crate::SourceKind::Invoice, invoice));

        rolls
            .apply(-5, MovementKind::Consumption, MovementSource::manual(), None, now)
            .unwrap();
        assert_eq!(rolls.quantity(), 7);
    }

    #[test]
    fn cannot_consume_more_rolls_than_available() {
        let (mut rolls, _) = SupplyStock::create(
            NewSupply {
                name: "Rollo de alfalfa".to_string(),
                unit: Unit::Roll,
                quantity: 3,
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        let err = rolls
            .apply(-4, MovementKind::Consumption, MovementSource::manual(), None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn reverting_a_purchase_takes_the_quantity_back() {
        let now = Utc::now();
        let (mut rolls, _) = SupplyStock::create(
            NewSupply {
                name: "Rollo de alfalfa".to_string(),
                unit: Unit::Roll,
                ..Default::default()
            },
            now,
        )
        .unwrap();
        let bought = rolls
            .apply(8, MovementKind::Purchase, MovementSource::invoice(AggregateId::new()), None, now)
            .unwrap();
        assert_eq!(rolls.revert_movement(&bought, now).unwrap(), 0);
        assert_eq!(rolls.quantity(), 0);
        assert!(rolls.revert_movement(&bought, now).is_err());
    }
}
