//! Sales domain module.
//!
//! A sale takes finished stock out of inventory and leaves an amount owed by a
//! client. Its settlement status is always derived from the amounts it holds;
//! payments reach it through allocations recorded by the treasury layer.
//!
//! Pure domain logic (no IO, no HTTP, no storage).

pub mod duplicates;
pub mod sale;

pub use duplicates::{DuplicateGroup, Fingerprint, find_duplicates, likely_duplicate_of};
pub use sale::{NewSale, Sale, SaleId, SaleLine, SaleLineInput, SalePatch};
