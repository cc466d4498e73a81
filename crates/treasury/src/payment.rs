use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use pelleterp_core::{DomainError, DomainResult, Money, entity_id, impl_document};
use pelleterp_invoicing::Counterparty;

use crate::allocation::{Allocation, AllocationPlan, AllocationTarget};
use crate::check::CheckId;

entity_id!(PaymentId, "payment id");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentDirection {
    /// Received from a client.
    Incoming,
    /// Paid to a supplier.
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Transfer,
    Check,
    /// Paid out of the client's credit balance.
    CreditBalance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Active,
    Reversed,
}

/// Everything needed to record a payment once its allocation is planned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub direction: PaymentDirection,
    pub counterparty: Counterparty,
    pub date: NaiveDate,
    pub amount: Money,
    pub method: PaymentMethod,
    pub check_id: Option<CheckId>,
    pub notes: Option<String>,
}

/// A payment received from a client or made to a supplier.
///
/// Invariant: `Σ allocations + excess == amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    direction: PaymentDirection,
    counterparty: Counterparty,
    pub date: NaiveDate,
    amount: Money,
    method: PaymentMethod,
    check_id: Option<CheckId>,
    allocations: Vec<Allocation>,
    excess: Money,
    status: PaymentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl_document!(Payment, "payments");

impl Payment {
    pub fn record(input: NewPayment, plan: AllocationPlan, now: DateTime<Utc>) -> DomainResult<Self> {
        input.amount.ensure_positive("payment amount")?;

        match (input.direction, input.counterparty) {
            (PaymentDirection::Incoming, Counterparty::Client(_))
            | (PaymentDirection::Outgoing, Counterparty::Supplier(_)) => {}
            (PaymentDirection::Incoming, _) => {
                return Err(DomainError::validation("incoming payments come from a client"));
            }
            (PaymentDirection::Outgoing, _) => {
                return Err(DomainError::validation("outgoing payments go to a supplier"));
            }
        }

        match input.method {
            PaymentMethod::Check if input.check_id.is_none() => {
                return Err(DomainError::validation("check payments need check data"));
            }
            PaymentMethod::CreditBalance if input.direction == PaymentDirection::Outgoing => {
                return Err(DomainError::validation(
                    "credit balance can only pay incoming payments",
                ));
            }
            PaymentMethod::CreditBalance if plan.excess.is_positive() => {
                return Err(DomainError::validation(
                    "credit balance payments cannot exceed what they pay",
                ));
            }
            _ => {}
        }
        if input.method != PaymentMethod::Check && input.check_id.is_some() {
            return Err(DomainError::validation("only check payments carry a check"));
        }

        if input.direction == PaymentDirection::Outgoing && plan.excess.is_positive() {
            return Err(DomainError::validation(format!(
                "outgoing payment exceeds the allocated invoices by {}",
                plan.excess
            )));
        }

        let allocated = Money::sum(plan.allocations.iter().map(|a| a.amount))?;
        if allocated.checked_add(plan.excess)? != input.amount || plan.excess.is_negative() {
            return Err(DomainError::invariant(
                "allocations and excess must add up to the payment amount",
            ));
        }

        Ok(Self {
            id: PaymentId::new(),
            direction: input.direction,
            counterparty: input.counterparty,
            date: input.date,
            amount: input.amount,
            method: input.method,
            check_id: input.check_id,
            allocations: plan.allocations,
            excess: plan.excess,
            status: PaymentStatus::Active,
            notes: input.notes.filter(|n| !n.trim().is_empty()),
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    pub fn direction(&self) -> PaymentDirection {
        self.direction
    }

    pub fn counterparty(&self) -> Counterparty {
        self.counterparty
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn method(&self) -> PaymentMethod {
        self.method
    }

    pub fn check_id(&self) -> Option<CheckId> {
        self.check_id
    }

    pub fn allocations(&self) -> &[Allocation] {
        &self.allocations
    }

    pub fn excess(&self) -> Money {
        self.excess
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == PaymentStatus::Active
    }

    pub fn allocated_to(&self, target: AllocationTarget) -> Money {
        self.allocations
            .iter()
            .filter(|a| a.target == target)
            .fold(Money::ZERO, |acc, a| {
                Money::from_cents(acc.cents().saturating_add(a.amount.cents()))
            })
    }

    /// Release everything allocated to `target`. The amount moves into the
    /// excess, except for credit-balance payments, which never carry one.
    /// Returns the released amount (zero when nothing was allocated there).
    pub fn release(&mut self, target: AllocationTarget, now: DateTime<Utc>) -> DomainResult<Money> {
        let released = Money::sum(
            self.allocations
                .iter()
                .filter(|a| a.target == target)
                .map(|a| a.amount),
        )?;
        if released.is_zero() {
            return Ok(released);
        }
        self.allocations.retain(|a| a.target != target);
        if self.method != PaymentMethod::CreditBalance {
            self.excess = self.excess.checked_add(released)?;
        }
        self.updated_at = now;
        Ok(released)
    }

    /// Mark the payment reversed. Allocations are kept as a record of what
    /// has to be undone.
    pub fn reverse(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.is_active() {
            return Err(DomainError::conflict("payment is already reversed"));
        }
        self.status = PaymentStatus::Reversed;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::{OpenItem, allocate};
    use pelleterp_invoicing::InvoiceId;
    use pelleterp_parties::{ClientId, SupplierId};
    use pelleterp_sales::SaleId;

    fn input(direction: PaymentDirection, amount: i64) -> NewPayment {
        NewPayment {
            direction,
            counterparty: match direction {
                PaymentDirection::Incoming => Counterparty::Client(ClientId::new()),
                PaymentDirection::Outgoing => Counterparty::Supplier(SupplierId::new()),
            },
            date: NaiveDate::from_ymd_opt(2024, 8, 1).unwrap(),
            amount: Money::from_cents(amount),
            method: PaymentMethod::Transfer,
            check_id: None,
            notes: None,
        }
    }

    fn one_sale(outstanding: i64) -> (AllocationTarget, Vec<OpenItem>) {
        let target = AllocationTarget::Sale(SaleId::new());
        (
            target,
            vec![OpenItem {
                target,
                outstanding: Money::from_cents(outstanding),
            }],
        )
    }

    #[test]
    fn incoming_overpayment_keeps_excess() {
        let (target, items) = one_sale(700);
        let plan = allocate(Money::from_cents(1_000), &items).unwrap();
        let p = Payment::record(input(PaymentDirection::Incoming, 1_000), plan, Utc::now()).unwrap();
        assert_eq!(p.excess().cents(), 300);
        assert_eq!(p.allocated_to(target).cents(), 700);
    }

    #[test]
    fn outgoing_excess_is_rejected() {
        let items = vec![OpenItem {
            target: AllocationTarget::Invoice(InvoiceId::new()),
            outstanding: Money::from_cents(500),
        }];
        let plan = allocate(Money::from_cents(600), &items).unwrap();
        let err = Payment::record(input(PaymentDirection::Outgoing, 600), plan, Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn check_method_needs_a_check() {
        let (_, items) = one_sale(1_000);
        let plan = allocate(Money::from_cents(1_000), &items).unwrap();
        let mut new = input(PaymentDirection::Incoming, 1_000);
        new.method = PaymentMethod::Check;
        assert!(Payment::record(new, plan, Utc::now()).is_err());
    }

    #[test]
    fn credit_balance_is_incoming_only() {
        let plan = AllocationPlan {
            allocations: vec![],
            excess: Money::ZERO,
        };
        let mut new = input(PaymentDirection::Outgoing, 100);
        new.method = PaymentMethod::CreditBalance;
        assert!(Payment::record(new, plan, Utc::now()).is_err());
    }

    #[test]
    fn release_moves_allocation_into_excess() {
        let (target, items) = one_sale(1_000);
        let plan = allocate(Money::from_cents(1_000), &items).unwrap();
        let mut p =
            Payment::record(input(PaymentDirection::Incoming, 1_000), plan, Utc::now()).unwrap();
        let released = p.release(target, Utc::now()).unwrap();
        assert_eq!(released.cents(), 1_000);
        assert_eq!(p.excess().cents(), 1_000);
        assert!(p.allocations().is_empty());
        assert_eq!(p.release(target, Utc::now()).unwrap(), Money::ZERO);
    }

    #[test]
    fn released_credit_balance_payment_keeps_no_excess() {
        let (target, items) = one_sale(1_000);
        let plan = allocate(Money::from_cents(600), &items).unwrap();
        let mut new = input(PaymentDirection::Incoming, 600);
        new.method = PaymentMethod::CreditBalance;
        let mut p = Payment::record(new, plan, Utc::now()).unwrap();

        assert_eq!(p.release(target, Utc::now()).unwrap().cents(), 600);
        assert!(p.allocations().is_empty());
        assert_eq!(p.excess(), Money::ZERO);
    }

    #[test]
    fn reversal_happens_once() {
        let plan = allocate(Money::from_cents(10), &[]).unwrap();
        let mut p =
            Payment::record(input(PaymentDirection::Incoming, 10), plan, Utc::now()).unwrap();
        p.reverse(Utc::now()).unwrap();
        assert!(matches!(p.reverse(Utc::now()), Err(DomainError::Conflict(_))));
    }
}
