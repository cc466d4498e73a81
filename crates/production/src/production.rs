use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use pelleterp_core::{DomainError, DomainResult, entity_id, impl_document};
use pelleterp_inventory::{
    MovementKind, MovementSource, Stock, StockId, StockMovement, SupplyId, SupplyMovement,
    SupplyStock, Unit,
};

use crate::batch::BatchCode;

entity_id!(ProductionId, "production id");
entity_id!(SupplyConsumptionId, "supply consumption id");
entity_id!(PelletGenerationId, "pellet generation id");

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConsumptionInput {
    pub supply_id: SupplyId,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GenerationInput {
    pub stock_id: StockId,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewProduction {
    pub date: NaiveDate,
    #[serde(default)]
    pub batch_code: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub consumptions: Vec<ConsumptionInput>,
    pub generations: Vec<GenerationInput>,
}

/// A production batch.
///
/// `total_consumed`/`total_generated` and the record id lists are derived
/// from the batch's consumption and generation records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Production {
    pub id: ProductionId,
    pub date: NaiveDate,
    pub batch_code: String,
    pub notes: Option<String>,
    pub total_consumed: i64,
    pub total_generated: i64,
    pub consumption_ids: Vec<SupplyConsumptionId>,
    pub generation_ids: Vec<PelletGenerationId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl_document!(Production, "productions");

/// Supply used by a production. `unit` is the supply's unit at the time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyConsumption {
    pub id: SupplyConsumptionId,
    pub production_id: ProductionId,
    pub supply_id: SupplyId,
    pub quantity: i64,
    pub unit: Unit,
    #[serde(default)]
    pub version: u64,
}

impl_document!(SupplyConsumption, "supply_consumptions");

/// Finished stock generated by a production.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PelletGeneration {
    pub id: PelletGenerationId,
    pub production_id: ProductionId,
    pub stock_id: StockId,
    pub quantity: i64,
    pub unit: Unit,
    #[serde(default)]
    pub version: u64,
}

impl_document!(PelletGeneration, "pellet_generations");

/// A production together with its records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductionRecords {
    #[serde(flatten)]
    pub production: Production,
    pub consumptions: Vec<SupplyConsumption>,
    pub generations: Vec<PelletGeneration>,
}

/// Output of a production: generated over consumed mass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YieldRow {
    pub production_id: ProductionId,
    pub batch_code: String,
    pub date: NaiveDate,
    pub consumed_kg: Option<i64>,
    pub generated_kg: Option<i64>,
    /// Present only when both sides are measured in mass units.
    pub ratio: Option<f64>,
}

/// Movements written alongside a registered or reversed production.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryEffects {
    pub supply_movements: Vec<SupplyMovement>,
    pub stock_movements: Vec<StockMovement>,
}

fn lookup<'a, K: Ord + core::fmt::Display, V>(
    map: &'a mut BTreeMap<K, V>,
    key: &K,
    what: &str,
) -> DomainResult<&'a mut V> {
    map.get_mut(key)
        .ok_or_else(|| DomainError::not_found(format!("{what} {key}")))
}

impl Production {
    /// Build a production and apply it to the given inventory records.
    ///
    /// `supplies` and `stocks` must contain every referenced item; they are
    /// mutated in place and the movements describing the change are returned.
    /// On error nothing should be persisted.
    pub fn register(
        input: NewProduction,
        batch_code: BatchCode,
        supplies: &mut BTreeMap<SupplyId, SupplyStock>,
        stocks: &mut BTreeMap<StockId, Stock>,
        now: DateTime<Utc>,
    ) -> DomainResult<(ProductionRecords, InventoryEffects)> {
        if input.generations.is_empty() {
            return Err(DomainError::validation(
                "a production must generate at least one stock item",
            ));
        }

        let id = ProductionId::new();
        let source = MovementSource::production(id.0);
        let note = Some(format!("production {}", batch_code.as_str()));
        let mut effects = InventoryEffects::default();

        let mut consumptions = Vec::with_capacity(input.consumptions.len());
        for c in input.consumptions {
            if c.quantity <= 0 {
                return Err(DomainError::validation("consumed quantity must be positive"));
            }
            let supply = lookup(supplies, &c.supply_id, "supply")?;
            effects.supply_movements.push(supply.apply(
                -c.quantity,
                MovementKind::Consumption,
                source,
                note.clone(),
                now,
            )?);
            consumptions.push(SupplyConsumption {
                id: SupplyConsumptionId::new(),
                production_id: id,
                supply_id: c.supply_id,
                quantity: c.quantity,
                unit: supply.unit,
                version: 0,
            });
        }

        let mut generations = Vec::with_capacity(input.generations.len());
        for g in input.generations {
            if g.quantity <= 0 {
                return Err(DomainError::validation("generated quantity must be positive"));
            }
            let stock = lookup(stocks, &g.stock_id, "stock")?;
            effects.stock_movements.push(stock.apply(
                g.quantity,
                MovementKind::Production,
                source,
                note.clone(),
                now,
            )?);
            generations.push(PelletGeneration {
                id: PelletGenerationId::new(),
                production_id: id,
                stock_id: g.stock_id,
                quantity: g.quantity,
                unit: stock.unit,
                version: 0,
            });
        }

        let mut production = Production {
            id,
            date: input.date,
            batch_code: batch_code.into_string(),
            notes: input.notes.filter(|n| !n.trim().is_empty()),
            total_consumed: 0,
            total_generated: 0,
            consumption_ids: Vec::new(),
            generation_ids: Vec::new(),
            created_at: now,
            version: 0,
        };
        production.recompute(&consumptions, &generations);

        Ok((
            ProductionRecords {
                production,
                consumptions,
                generations,
            },
            effects,
        ))
    }

    /// Recompute totals and record lists from the records that belong to this
    /// production. Returns `true` when anything changed.
    pub fn recompute(
        &mut self,
        consumptions: &[SupplyConsumption],
        generations: &[PelletGeneration],
    ) -> bool {
        let own_c: Vec<_> = consumptions
            .iter()
            .filter(|c| c.production_id == self.id)
            .collect();
        let own_g: Vec<_> = generations
            .iter()
            .filter(|g| g.production_id == self.id)
            .collect();

        let total_consumed = own_c.iter().map(|c| c.quantity).sum();
        let total_generated = own_g.iter().map(|g| g.quantity).sum();
        let consumption_ids: Vec<_> = own_c.iter().map(|c| c.id).collect();
        let generation_ids: Vec<_> = own_g.iter().map(|g| g.id).collect();

        let changed = total_consumed != self.total_consumed
            || total_generated != self.total_generated
            || consumption_ids != self.consumption_ids
            || generation_ids != self.generation_ids;

        self.total_consumed = total_consumed;
        self.total_generated = total_generated;
        self.consumption_ids = consumption_ids;
        self.generation_ids = generation_ids;
        changed
    }
}

impl ProductionRecords {
    /// Undo the inventory effects of this production.
    ///
    /// Generated stock must still be on hand. Items that no longer exist are
    /// skipped.
    pub fn reverse(
        &self,
        supplies: &mut BTreeMap<SupplyId, SupplyStock>,
        stocks: &mut BTreeMap<StockId, Stock>,
        now: DateTime<Utc>,
    ) -> DomainResult<InventoryEffects> {
        let source = MovementSource::production(self.production.id.0);
        let note = Some(format!("production {} deleted", self.production.batch_code));
        let mut effects = InventoryEffects::default();

        for g in &self.generations {
            if let Some(stock) = stocks.get_mut(&g.stock_id) {
                effects.stock_movements.push(stock.apply(
                    -g.quantity,
                    MovementKind::ProductionReversal,
                    source,
                    note.clone(),
                    now,
                )?);
            }
        }
        for c in &self.consumptions {
            if let Some(supply) = supplies.get_mut(&c.supply_id) {
                effects.supply_movements.push(supply.apply(
                    c.quantity,
                    MovementKind::ConsumptionReversal,
                    source,
                    note.clone(),
                    now,
                )?);
            }
        }
        Ok(effects)
    }

    pub fn yield_row(&self) -> YieldRow {
        fn mass(items: impl Iterator<Item = (Unit, i64)>) -> Option<i64> {
            let mut total = 0i64;
            let mut any = false;
            for (unit, qty) in items {
                total = total.checked_add(unit.kilograms(qty)?)?;
                any = true;
            }
            any.then_some(total)
        }

        let consumed_kg = mass(self.consumptions.iter().map(|c| (c.unit, c.quantity)));
        let generated_kg = mass(self.generations.iter().map(|g| (g.unit, g.quantity)));
        let ratio = match (consumed_kg, generated_kg) {
            (Some(c), Some(g)) if c > 0 => Some(g as f64 / c as f64),
            _ => None,
        };
        YieldRow {
            production_id: self.production.id,
            batch_code: self.production.batch_code.clone(),
            date: self.production.date,
            consumed_kg,
            generated_kg,
            ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::next_batch_code;
    use pelleterp_inventory::{NewStock, NewSupply};

    struct Fixture {
        supplies: BTreeMap<SupplyId, SupplyStock>,
        stocks: BTreeMap<StockId, Stock>,
        alfalfa: SupplyId,
        bulk: StockId,
        bags: StockId,
    }

    fn fixture() -> Fixture {
        let now = Utc::now();
        let (alfalfa, _) = SupplyStock::create(
            NewSupply {
                name: "Alfalfa".into(),
                unit: Unit::Kg,
                quantity: 1_000,
                ..Default::default()
            },
            now,
        )
        .unwrap();
        let (bulk, _) = Stock::create(
            NewStock {
                name: "Pellet granel".into(),
                unit: Unit::Kg,
                ..Default::default()
            },
            now,
        )
        .unwrap();
        let (bags, _) = Stock::create(
            NewStock {
                name: "Pellet bolsa 25 kg".into(),
                unit: Unit::Bag,
                quantity: 5,
                ..Default::default()
            },
            now,
        )
        .unwrap();
        Fixture {
            alfalfa: alfalfa.id,
            bulk: bulk.id,
            bags: bags.id,
            supplies: BTreeMap::from([(alfalfa.id, alfalfa)]),
            stocks: BTreeMap::from([(bulk.id, bulk), (bags.id, bags)]),
        }
    }

    fn input(f: &Fixture, consumed: i64, generated: i64) -> NewProduction {
        NewProduction {
            date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            batch_code: None,
            notes: None,
            consumptions: vec![ConsumptionInput {
                supply_id: f.alfalfa,
                quantity: consumed,
            }],
            generations: vec![GenerationInput {
                stock_id: f.bulk,
                quantity: generated,
            }],
        }
    }

    fn code() -> BatchCode {
        next_batch_code(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(), [])
    }

    #[test]
    fn register_moves_both_sides_and_derives_totals() {
        let mut f = fixture();
        let (records, effects) = Production::register(
            input(&f, 600, 540),
            code(),
            &mut f.supplies,
            &mut f.stocks,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(f.supplies[&f.alfalfa].quantity(), 400);
        assert_eq!(f.stocks[&f.bulk].quantity(), 540);
        assert_eq!(records.production.total_consumed, 600);
        assert_eq!(records.production.total_generated, 540);
        assert_eq!(records.production.batch_code, "P-20240502-001");
        assert_eq!(effects.supply_movements[0].kind, MovementKind::Consumption);
        assert_eq!(effects.stock_movements[0].kind, MovementKind::Production);

        let row = records.yield_row();
        assert_eq!(row.ratio, Some(0.9));
    }

    #[test]
    fn insufficient_supply_is_an_invariant_violation() {
        let mut f = fixture();
        let err = Production::register(
            input(&f, 1_001, 900),
            code(),
            &mut f.supplies,
            &mut f.stocks,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn requires_a_generation() {
        let mut f = fixture();
        let mut new = input(&f, 10, 10);
        new.generations.clear();
        let err = Production::register(new, code(), &mut f.supplies, &mut f.stocks, Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn yield_is_absent_for_non_mass_units() {
        let mut f = fixture();
        let mut new = input(&f, 100, 1);
        new.generations[0].stock_id = f.bags;
        let (records, _) =
            Production::register(new, code(), &mut f.supplies, &mut f.stocks, Utc::now()).unwrap();
        assert_eq!(records.yield_row().ratio, None);
    }

    #[test]
    fn reverse_restores_inventory() {
        let mut f = fixture();
        let (records, _) = Production::register(
            input(&f, 600, 540),
            code(),
            &mut f.supplies,
            &mut f.stocks,
            Utc::now(),
        )
        .unwrap();
        let effects = records
            .reverse(&mut f.supplies, &mut f.stocks, Utc::now())
            .unwrap();
        assert_eq!(f.supplies[&f.alfalfa].quantity(), 1_000);
        assert_eq!(f.stocks[&f.bulk].quantity(), 0);
        assert_eq!(effects.stock_movements[0].kind, MovementKind::ProductionReversal);
    }

    #[test]
    fn reverse_fails_when_generated_stock_was_sold() {
        let mut f = fixture();
        let (records, _) = Production::register(
            input(&f, 600, 540),
            code(),
            &mut f.supplies,
            &mut f.stocks,
            Utc::now(),
        )
        .unwrap();
        f.stocks
            .get_mut(&f.bulk)
            .unwrap()
            .apply(-100, MovementKind::Sale, MovementSource::manual(), None, Utc::now())
            .unwrap();
        let err = records
            .reverse(&mut f.supplies, &mut f.stocks, Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn recompute_drops_orphans_and_fixes_totals() {
        let mut f = fixture();
        let (mut records, _) = Production::register(
            input(&f, 600, 540),
            code(),
            &mut f.supplies,
            &mut f.stocks,
            Utc::now(),
        )
        .unwrap();
        records.production.total_generated = 9_999;
        let changed = records
            .production
            .recompute(&records.consumptions, &[]);
        assert!(changed);
        assert_eq!(records.production.total_generated, 0);
        assert!(records.production.generation_ids.is_empty());
        assert_eq!(records.production.total_consumed, 600);
    }
}
