//! Inventory domain module: finished pellet stock and production supplies.
//!
//! Both families keep a quantity that can never go negative, and every change
//! to it is described by exactly one movement record (the ledger the
//! quantity can be rebuilt from).

pub mod level;
pub mod movement;
pub mod stock;
pub mod supply;

pub use level::{Level, Unit};
pub use movement::{MovementKind, MovementSource, SourceKind};
pub use stock::{NewStock, Stock, StockId, StockMovement, StockMovementId, StockPatch};
pub use supply::{NewSupply, SupplyId, SupplyMovement, SupplyMovementId, SupplyPatch, SupplyStock};
