//! Finished stock and production supplies.
//!
//! Both families share the same operations; every quantity change is
//! committed together with the movement that describes it.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use pelleterp_core::DomainError;
use pelleterp_inventory::{
    MovementKind, MovementSource, NewStock, NewSupply, Stock, StockId, StockMovement, StockPatch,
    SupplyId, SupplyMovement, SupplyPatch, SupplyStock,
};

use super::{ServiceResult, Services, committed};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InventoryQuery {
    pub search: Option<String>,
    pub active: Option<bool>,
}

impl InventoryQuery {
    fn accepts(&self, name: &str, active: bool) -> bool {
        self.active.is_none_or(|a| a == active)
            && self
                .search
                .as_deref()
                .map(|q| q.trim().to_lowercase())
                .is_none_or(|q| name.to_lowercase().contains(&q))
    }
}

/// Manual correction of a quantity.
#[derive(Debug, Clone, Deserialize)]
pub struct Adjustment {
    pub delta: i64,
    #[serde(default)]
    pub note: Option<String>,
}

impl Adjustment {
    fn checked(self) -> ServiceResult<(i64, Option<String>)> {
        if self.delta == 0 {
            return Err(DomainError::validation("adjustment delta must not be zero").into());
        }
        Ok((self.delta, self.note.filter(|n| !n.trim().is_empty())))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StockAdjusted {
    pub stock: Stock,
    pub movement: StockMovement,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupplyAdjusted {
    pub supply: SupplyStock,
    pub movement: SupplyMovement,
}

fn has_history<'a>(mut kinds: impl Iterator<Item = &'a MovementKind>) -> bool {
    kinds.any(|k| *k != MovementKind::Opening)
}

impl Services {
    #[instrument(skip_all, err)]
    pub async fn create_stock(&self, input: NewStock) -> ServiceResult<Stock> {
        let (stock, opening) = Stock::create(input, self.now())?;
        let mut work = self.work();
        work.record(&stock)?;
        if let Some(m) = &opening {
            work.record(m)?;
        }
        work.commit().await?;
        info!(stock_id = %stock.id, quantity = stock.quantity(), "stock created");
        Ok(committed(stock))
    }

    pub async fn get_stock(&self, id: StockId) -> ServiceResult<Stock> {
        self.require(id, "stock").await
    }

    pub async fn list_stock(&self, query: &InventoryQuery) -> ServiceResult<Vec<Stock>> {
        let mut items: Vec<Stock> = self
            .store()
            .list::<Stock>()
            .await?
            .into_iter()
            .filter(|s| query.accepts(&s.name, s.active))
            .collect();
        items.sort_by_key(|s| s.name.to_lowercase());
        Ok(items)
    }

    /// Active items at or below their minimum quantity.
    pub async fn low_stock(&self) -> ServiceResult<Vec<Stock>> {
        let mut items: Vec<Stock> = self
            .store()
            .list::<Stock>()
            .await?
            .into_iter()
            .filter(|s| s.active && s.is_low())
            .collect();
        items.sort_by_key(|s| s.quantity());
        Ok(items)
    }

    #[instrument(skip(self, patch), fields(stock_id = %id), err)]
    pub async fn update_stock(&self, id: StockId, patch: StockPatch) -> ServiceResult<Stock> {
        let mut stock: Stock = self.require(id, "stock").await?;
        stock.apply_patch(patch, self.now())?;
        self.commit_one(stock).await
    }

    #[instrument(skip(self, input), fields(stock_id = %id, delta = input.delta), err)]
    pub async fn adjust_stock(&self, id: StockId, input: Adjustment) -> ServiceResult<StockAdjusted> {
        let (delta, note) = input.checked()?;
        let mut stock: Stock = self.require(id, "stock").await?;
        let movement = stock.apply(
            delta,
            MovementKind::Adjustment,
            MovementSource::manual(),
            note,
            self.now(),
        )?;
        let mut work = self.work();
        work.record(&stock)?;
        work.record(&movement)?;
        work.commit().await?;
        info!(stock_id = %id, quantity = stock.quantity(), "stock adjusted");
        Ok(StockAdjusted {
            stock: committed(stock),
            movement: committed(movement),
        })
    }

    /// Movements of one item, oldest first.
    pub async fn stock_movements(&self, id: StockId) -> ServiceResult<Vec<StockMovement>> {
        let _: Stock = self.require(id, "stock").await?;
        let mut movements: Vec<StockMovement> = self
            .store()
            .list::<StockMovement>()
            .await?
            .into_iter()
            .filter(|m| m.stock_id == id)
            .collect();
        movements.sort_by_key(|m| m.at);
        Ok(movements)
    }

    /// Rejected while the item has movements besides its opening one, unless
    /// `force` is set; the movements are deleted with the item.
    #[instrument(skip(self), fields(stock_id = %id), err)]
    pub async fn delete_stock(&self, id: StockId, force: bool) -> ServiceResult<()> {
        let movements = self.stock_movements(id).await?;
        if !force && has_history(movements.iter().map(|m| &m.kind)) {
            return Err(DomainError::conflict(
                "stock has movements; pass force to delete it with its history",
            )
            .into());
        }
        let stock: Stock = self.require(id, "stock").await?;
        let mut work = self.work();
        for m in &movements {
            work.changes.delete(m);
        }
        work.stocks.track(id, stock);
        work.stocks.remove(&id);
        work.commit().await?;
        info!(stock_id = %id, movements = movements.len(), "stock deleted");
        Ok(())
    }

    #[instrument(skip_all, err)]
    pub async fn create_supply(&self, input: NewSupply) -> ServiceResult<SupplyStock> {
        let (supply, opening) = SupplyStock::create(input, self.now())?;
        let mut work = self.work();
        work.record(&supply)?;
        if let Some(m) = &opening {
            work.record(m)?;
        }
        work.commit().await?;
        info!(supply_id = %supply.id, quantity = supply.quantity(), "supply created");
        Ok(committed(supply))
    }

    pub async fn get_supply(&self, id: SupplyId) -> ServiceResult<SupplyStock> {
        self.require(id, "supply").await
    }

    pub async fn list_supplies(&self, query: &InventoryQuery) -> ServiceResult<Vec<SupplyStock>> {
        let mut items: Vec<SupplyStock> = self
            .store()
            .list::<SupplyStock>()
            .await?
            .into_iter()
            .filter(|s| query.accepts(&s.name, s.active))
            .collect();
        items.sort_by_key(|s| s.name.to_lowercase());
        Ok(items)
    }

    pub async fn low_supplies(&self) -> ServiceResult<Vec<SupplyStock>> {
        let mut items: Vec<SupplyStock> = self
            .store()
            .list::<SupplyStock>()
            .await?
            .into_iter()
            .filter(|s| s.active && s.is_low())
            .collect();
        items.sort_by_key(|s| s.quantity());
        Ok(items)
    }

    #[instrument(skip(self, patch), fields(supply_id = %id), err)]
    pub async fn update_supply(&self, id: SupplyId, patch: SupplyPatch) -> ServiceResult<SupplyStock> {
        let mut supply: SupplyStock = self.require(id, "supply").await?;
        supply.apply_patch(patch, self.now())?;
        self.commit_one(supply).await
    }

    #[instrument(skip(self, input), fields(supply_id = %id, delta = input.delta), err)]
    pub async fn adjust_supply(&self, id: SupplyId, input: Adjustment) -> ServiceResult<SupplyAdjusted> {
        let (delta, note) = input.checked()?;
        let mut supply: SupplyStock = self.require(id, "supply").await?;
        let movement = supply.apply(
            delta,
            MovementKind::Adjustment,
            MovementSource::manual(),
            note,
            self.now(),
        )?;
        let mut work = self.work();
        work.record(&supply)?;
        work.record(&movement)?;
        work.commit().await?;
        info!(supply_id = %id, quantity = supply.quantity(), "supply adjusted");
        Ok(SupplyAdjusted {
            supply: committed(supply),
            movement: committed(movement),
        })
    }

    pub async fn supply_movements(&self, id: SupplyId) -> ServiceResult<Vec<SupplyMovement>> {
        let _: SupplyStock = self.require(id, "supply").await?;
        let mut movements: Vec<SupplyMovement> = self
            .store()
            .list::<SupplyMovement>()
            .await?
            .into_iter()
            .filter(|m| m.supply_id == id)
            .collect();
        movements.sort_by_key(|m| m.at);
        Ok(movements)
    }

    #[instrument(skip(self), fields(supply_id = %id), err)]
    pub async fn delete_supply(&self, id: SupplyId, force: bool) -> ServiceResult<()> {
        let movements = self.supply_movements(id).await?;
        if !force && has_history(movements.iter().map(|m| &m.kind)) {
            return Err(DomainError::conflict(
                "supply has movements; pass force to delete it with its history",
            )
            .into());
        }
        let supply: SupplyStock = self.require(id, "supply").await?;
        let mut work = self.work();
        for m in &movements {
            work.changes.delete(m);
        }
        work.supplies.track(id, supply);
        work.supplies.remove(&id);
        work.commit().await?;
        info!(supply_id = %id, movements = movements.len(), "supply deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ServiceError;
    use crate::services::testing::*;

    #[tokio::test]
    async fn opening_quantity_is_recorded_as_a_movement() {
        let svc = services();
        let stock = bags(&svc, 12).await;
        assert_eq!(stock.version, 1);

        let movements = svc.stock_movements(stock.id).await.unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].kind, MovementKind::Opening);
        assert_eq!(movements[0].balance_after, 12);
    }

    #[tokio::test]
    async fn adjustment_cannot_take_quantity_below_zero() {
        let svc = services();
        let stock = bags(&svc, 3).await;
        let err = svc
            .adjust_stock(
                stock.id,
                Adjustment {
                    delta: -4,
                    note: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::InvariantViolation(_))));
        assert_eq!(svc.get_stock(stock.id).await.unwrap().quantity(), 3);
        assert_eq!(svc.stock_movements(stock.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn low_stock_lists_items_at_or_below_minimum() {
        let svc = services();
        let stock = bags(&svc, 6).await;
        assert!(svc.low_stock().await.unwrap().is_empty());

        let adjusted = svc
            .adjust_stock(
                stock.id,
                Adjustment {
                    delta: -1,
                    note: Some("rotura".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(adjusted.movement.kind, MovementKind::Adjustment);
        assert_eq!(svc.low_stock().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_with_history_requires_force() {
        let svc = services();
        let rolls = rolls(&svc, 4).await;
        svc.adjust_supply(
            rolls.id,
            Adjustment {
                delta: 2,
                note: None,
            },
        )
        .await
        .unwrap();

        let err = svc.delete_supply(rolls.id, false).await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Conflict(_))));

        svc.delete_supply(rolls.id, true).await.unwrap();
        assert!(svc.store().list::<SupplyMovement>().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn item_with_only_an_opening_movement_deletes_without_force() {
        let svc = services();
        let stock = bags(&svc, 5).await;
        svc.delete_stock(stock.id, false).await.unwrap();
        assert!(svc.list_stock(&InventoryQuery::default()).await.unwrap().is_empty());
    }
}
