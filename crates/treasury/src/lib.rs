//! Treasury domain module: payments, their allocation to invoices and sales,
//! and the check (cheque / echeq) lifecycle.
//!
//! Pure domain logic (no IO, no HTTP, no storage). Moving client credit and
//! the paid amounts of sales/invoices is orchestrated by the service layer
//! from the values these types return.

pub mod allocation;
pub mod check;
pub mod payment;

pub use allocation::{Allocation, AllocationPlan, AllocationTarget, OpenItem, allocate};
pub use check::{
    Check, CheckAction, CheckDirection, CheckId, CheckKind, CheckStatus, NewCheck, StatusChange,
    upcoming_horizon,
};
pub use payment::{
    NewPayment, Payment, PaymentDirection, PaymentId, PaymentMethod, PaymentStatus,
};
