//! Greedy allocation of a payment over open items.

use serde::{Deserialize, Serialize};

use pelleterp_core::{DomainResult, Money};
use pelleterp_invoicing::InvoiceId;
use pelleterp_sales::SaleId;

/// What a payment allocation pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum AllocationTarget {
    Invoice(InvoiceId),
    Sale(SaleId),
}

impl core::fmt::Display for AllocationTarget {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AllocationTarget::Invoice(id) => write!(f, "invoice {id}"),
            AllocationTarget::Sale(id) => write!(f, "sale {id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub target: AllocationTarget,
    pub amount: Money,
}

/// An item that can receive part of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenItem {
    pub target: AllocationTarget,
    pub outstanding: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationPlan {
    pub allocations: Vec<Allocation>,
    pub excess: Money,
}

/// Allocate `amount` over `items` in order.
///
/// Each item receives `min(remaining, outstanding)`; items with nothing
/// outstanding are skipped and whatever is left over is the excess.
pub fn allocate(amount: Money, items: &[OpenItem]) -> DomainResult<AllocationPlan> {
    amount.ensure_positive("payment amount")?;
    let mut remaining = amount;
    let mut allocations = Vec::new();
    for item in items {
        if !remaining.is_positive() {
            break;
        }
        if !item.outstanding.is_positive() {
            continue;
        }
        let take = remaining.min(item.outstanding);
        remaining = remaining.checked_sub(take)?;
        allocations.push(Allocation {
            target: item.target,
            amount: take,
        });
    }
    Ok(AllocationPlan {
        allocations,
        excess: remaining,
    })
}
