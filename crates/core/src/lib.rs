//! `pelleterp-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, money, settlement status, the document contract used by the
//! storage layer and the domain error model.

pub mod document;
pub mod error;
pub mod id;
pub mod money;
pub mod settlement;

pub use document::{Document, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, UserId};
pub use money::Money;
pub use settlement::SettlementStatus;
