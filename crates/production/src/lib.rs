//! Production domain module: pellet batches.
//!
//! A production consumes supplies (rolls, additives, bags) and generates
//! finished stock. This crate builds the batch records and their derived
//! totals; moving the supply and stock quantities is done by the caller in the
//! same changeset using the inventory types.

pub mod batch;
pub mod production;

pub use batch::{BatchCode, next_batch_code};
pub use production::{
    ConsumptionInput, GenerationInput, NewProduction, PelletGeneration, PelletGenerationId,
    InventoryEffects, Production, ProductionId, ProductionRecords, SupplyConsumption,
    SupplyConsumptionId, YieldRow,
};
