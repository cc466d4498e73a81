//! Finished product stock (pellets by presentation).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pelleterp_core::{DomainError, DomainResult, Money, entity_id, impl_document};

use crate::level::{Level, Unit};
use crate::movement::{MovementKind, MovementSource};

entity_id!(StockId, "stock id");
entity_id!(StockMovementId, "stock movement id");

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NewStock {
    pub name: String,
    #[serde(default)]
    pub unit: Unit,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub min_quantity: i64,
    #[serde(default)]
    pub price: Option<Money>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StockPatch {
    pub name: Option<String>,
    pub unit: Option<Unit>,
    pub min_quantity: Option<i64>,
    pub price: Option<Money>,
    pub active: Option<bool>,
}

/// A finished product kept in stock, e.g. "Pellet alfalfa bolsa 25 kg".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    pub id: StockId,
    pub name: String,
    pub unit: Unit,
    #[serde(flatten)]
    level: Level,
    /// List price per unit.
    pub price: Option<Money>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl_document!(Stock, "stock");

/// One change of a [`Stock`] quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: StockMovementId,
    pub stock_id: StockId,
    pub kind: MovementKind,
    pub delta: i64,
    pub balance_after: i64,
    pub source: MovementSource,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl_document!(StockMovement, "stock_movements");

impl Stock {
    /// Create a stock item; a non-zero initial quantity yields an opening movement.
    pub fn create(input: NewStock, now: DateTime<Utc>) -> DomainResult<(Self, Option<StockMovement>)> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::validation("name is required"));
        }
        if let Some(price) = input.price {
            price.ensure_positive("price")?;
        }
        let mut stock = Self {
            id: StockId::new(),
            name,
            unit: input.unit,
            level: Level::new(0, input.min_quantity)?,
            price: input.price,
            active: true,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        let opening = match input.quantity {
            0 => None,
            q if q < 0 => return Err(DomainError::validation("quantity must not be negative")),
            q => Some(stock.apply(q, MovementKind::Opening, MovementSource::manual(), None, now)?),
        };
        Ok((stock, opening))
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

    pub fn apply_patch(&mut self, patch: StockPatch, now: DateTime<Utc>) -> DomainResult<()> {
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
        if let Some(price) = patch.price {
            self.price = Some(price.ensure_positive("price")?);
        }
        if let Some(active) = patch.active {
            self.active = active;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Change the quantity and describe the change as a movement.
    pub fn apply(
        &mut self,
        delta: i64,
        kind: MovementKind,
        source: MovementSource,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> DomainResult<StockMovement> {
        kind.check_delta(delta)?;
        let balance_after = self.level.apply(delta, &self.name)?;
        self.updated_at = at;
        Ok(StockMovement {
            id: StockMovementId::new(),
            stock_id: self.id,
            kind,
            delta,
            balance_after,
            source,
            note,
            at,
            version: 0,
        })
    }

    /// Reset the quantity to the sum of `movements`. Returns the previous
    /// quantity when it drifted.
    pub fn rebuild_from(&mut self, movements: &[StockMovement]) -> DomainResult<Option<i64>> {
        let total: i64 = movements
            .iter()
            .filter(|m| m.stock_id == self.id)
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

    fn bag() -> Stock {
        Stock::create(
            NewStock {
                name: "Pellet bolsa 25 kg".to_string(),
                unit: Unit::Bag,
                quantity: 40,
                min_quantity: 10,
                price: Some(Money::from_cents(1_250_000)),
            },
            Utc::now(),
        )
        .unwrap()
        .0
    }

    #[test]
    fn initial_quantity_produces_opening_movement() {
        let (stock, opening) = Stock::create(
            NewStock {
                name: "Pellet granel".to_string(),
                quantity: 1_000,
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        let opening = opening.unwrap();
        assert_eq!(stock.quantity(), 1_000);
        assert_eq!(opening.kind, MovementKind::Opening);
        assert_eq!(opening.balance_after, 1_000);
    }

    #[test]
    fn sale_movement_reduces_quantity() {
        let mut stock = bag();
        let mv = stock
            .apply(-15, MovementKind::Sale, MovementSource::manual(), None, Utc::now())
            .unwrap();
        assert_eq!(stock.quantity(), 25);
        assert_eq!(mv.balance_after, 25);
        assert_eq!(mv.stock_id, stock.id);
    }

    #[test]
    fn overselling_is_rejected_without_side_effects() {
        let mut stock = bag();
        let err = stock
            .apply(-41, MovementKind::Sale, MovementSource::manual(), None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(stock.quantity(), 40);
    }

    #[test]
    fn rebuild_from_ledger_fixes_drift() {
        let now = Utc::now();
        let (mut stock, opening) = Stock::create(
            NewStock {
                name: "Pellet granel".to_string(),
                quantity: 100,
                ..Default::default()
            },
            now,
        )
        .unwrap();
        let sale = stock
            .apply(-30, MovementKind::Sale, MovementSource::manual(), None, now)
            .unwrap();
        // Simulate a lost write: quantity drifted from the ledger.
        stock.level.reset(55, "x").unwrap();

        let previous = stock.rebuild_from(&[opening.unwrap(), sale]).unwrap();
        assert_eq!(previous, Some(55));
        assert_eq!(stock.quantity(), 70);
    }
}
