//! Parties domain module: clients and suppliers.
//!
//! Pure domain logic (no IO, no HTTP, no storage). Records are validated on
//! construction and mutated only through methods that keep their invariants.

pub mod client;
pub mod supplier;
pub mod tax;

pub use client::{Client, ClientId, ClientPatch, CreditEntry, CreditEntryKind, NewClient};
pub use supplier::{NewSupplier, Supplier, SupplierId, SupplierPatch};
pub use tax::{ContactInfo, TaxCondition, normalize_tax_id};
