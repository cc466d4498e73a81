//! Invoicing domain module.
//!
//! Sale invoices (to clients) and purchase invoices (from suppliers) with
//! Argentine letter rules (A/B/C), per-line VAT and totals computed on
//! construction. Pure domain logic (no IO, no HTTP, no storage).

pub mod invoice;
pub mod letter;
pub mod tax;

pub use invoice::{
    Counterparty, Invoice, InvoiceId, InvoiceKind, InvoiceLine, LineInput, NewPurchaseInvoice,
    NewSaleInvoice,
};
pub use letter::{InvoiceLetter, InvoiceNumber};
pub use tax::{TaxRate, Totals, line_amounts};
