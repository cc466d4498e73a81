use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{info, instrument};

use pelleterp_core::DomainError;
use pelleterp_production::{
    BatchCode, NewProduction, PelletGeneration, Production, ProductionId, ProductionRecords,
    SupplyConsumption, YieldRow, next_batch_code,
};

use super::unique::UniqueKey;
use super::{ServiceResult, Services, committed, within};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductionQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl Services {
    /// Register a batch: consumes supplies and adds finished stock, all in
    /// one commit.
    #[instrument(skip_all, fields(date = %input.date), err)]
    pub async fn register_production(&self, input: NewProduction) -> ServiceResult<ProductionRecords> {
        let existing = self.store().list::<Production>().await?;
        let code = match input.batch_code.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(raw) => {
                let code = BatchCode::parse(raw)?;
                if existing.iter().any(|p| p.batch_code == code.as_str()) {
                    return Err(DomainError::conflict(format!(
                        "batch code {} is already used",
                        code.as_str()
                    ))
                    .into());
                }
                code
            }
            None => next_batch_code(input.date, existing.iter().map(|p| p.batch_code.as_str())),
        };

        let mut work = self.work();
        for c in &input.consumptions {
            work.supplies.require(&work.store, c.supply_id, "supply").await?;
        }
        for g in &input.generations {
            work.stocks.require(&work.store, g.stock_id, "stock").await?;
        }

        let (records, effects) = Production::register(
            input,
            code,
            work.supplies.map_mut(),
            work.stocks.map_mut(),
            work.now,
        )?;
        work.claim_key(UniqueKey::batch_code(&records.production.batch_code), records.production.id)?;
        work.record(&records.production)?;
        work.record_all(&records.consumptions)?;
        work.record_all(&records.generations)?;
        work.record_all(&effects.supply_movements)?;
        work.record_all(&effects.stock_movements)?;
        work.commit().await?;

        info!(
            production_id = %records.production.id,
            batch = %records.production.batch_code,
            generated = records.production.total_generated,
            "production registered"
        );
        Ok(ProductionRecords {
            production: committed(records.production),
            consumptions: records.consumptions.into_iter().map(committed).collect(),
            generations: records.generations.into_iter().map(committed).collect(),
        })
    }

    pub async fn get_production(&self, id: ProductionId) -> ServiceResult<ProductionRecords> {
        let production: Production = self.require(id, "production").await?;
        self.records_of(production).await
    }

    async fn records_of(&self, production: Production) -> ServiceResult<ProductionRecords> {
        let consumptions = self
            .store()
            .list::<SupplyConsumption>()
            .await?
            .into_iter()
            .filter(|c| c.production_id == production.id)
            .collect();
        let generations = self
            .store()
            .list::<PelletGeneration>()
            .await?
            .into_iter()
            .filter(|g| g.production_id == production.id)
            .collect();
        Ok(ProductionRecords {
            production,
            consumptions,
            generations,
        })
    }

    /// Productions in the date range, most recent first.
    pub async fn list_productions(&self, query: &ProductionQuery) -> ServiceResult<Vec<Production>> {
        let mut productions: Vec<Production> = self
            .store()
            .list::<Production>()
            .await?
            .into_iter()
            .filter(|p| within(p.date, query.from, query.to))
            .collect();
        productions.sort_by(|a, b| b.date.cmp(&a.date).then(b.created_at.cmp(&a.created_at)));
        Ok(productions)
    }

    /// Undo a batch: generated stock goes out, consumed supplies come back.
    #[instrument(skip(self), fields(production_id = %id), err)]
    pub async fn delete_production(&self, id: ProductionId) -> ServiceResult<()> {
        let records = self.get_production(id).await?;

        let mut work = self.work();
        for c in &records.consumptions {
            work.supplies.load(&work.store, c.supply_id).await?;
        }
        for g in &records.generations {
            work.stocks.load(&work.store, g.stock_id).await?;
        }
        let effects = records.reverse(work.supplies.map_mut(), work.stocks.map_mut(), work.now)?;
        work.record_all(&effects.supply_movements)?;
        work.record_all(&effects.stock_movements)?;
        for c in &records.consumptions {
            work.changes.delete(c);
        }
        for g in &records.generations {
            work.changes.delete(g);
        }
        work.changes.delete(&records.production);
        work.release_key(UniqueKey::batch_code(&records.production.batch_code), id);
        work.commit().await?;

        info!(production_id = %id, batch = %records.production.batch_code, "production deleted");
        Ok(())
    }

    /// Generated over consumed mass per production in the range.
    pub async fn production_yield(&self, query: &ProductionQuery) -> ServiceResult<Vec<YieldRow>> {
        let consumptions = self.store().list::<SupplyConsumption>().await?;
        let generations = self.store().list::<PelletGeneration>().await?;
        let rows = self
            .list_productions(query)
            .await?
            .into_iter()
            .map(|production| {
                let records = ProductionRecords {
                    consumptions: consumptions
                        .iter()
                        .filter(|c| c.production_id == production.id)
                        .cloned()
                        .collect(),
                    generations: generations
                        .iter()
                        .filter(|g| g.production_id == production.id)
                        .cloned()
                        .collect(),
                    production,
                };
                records.yield_row()
            })
            .collect();
        Ok(rows)
    }
}
