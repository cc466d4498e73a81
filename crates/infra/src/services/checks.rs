//! Check portfolio: lifecycle transitions, endorsement to suppliers and the
//! upcoming-due report.
//!
//! A rejected check takes its payments down with it: the payment it settled
//! and, if it had been endorsed, the supplier payment made with it.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use pelleterp_core::DomainError;
use pelleterp_invoicing::{Counterparty, InvoiceId};
use pelleterp_parties::SupplierId;
use pelleterp_treasury::{
    AllocationTarget, Check, CheckAction, CheckDirection, CheckId, CheckStatus, NewCheck, NewPayment,
    Payment, PaymentDirection, PaymentId, PaymentMethod, upcoming_horizon,
};

use super::{ServiceResult, Services, Work, committed, within};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckQuery {
    pub status: Option<CheckStatus>,
    pub direction: Option<CheckDirection>,
    /// Payment date on or after.
    pub due_after: Option<NaiveDate>,
    /// Payment date on or before.
    pub due_before: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transition {
    pub action: CheckAction,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndorseRequest {
    pub supplier_id: SupplierId,
    /// Purchase invoices paid with the check, in order.
    pub invoice_ids: Vec<InvoiceId>,
    pub date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Endorsement {
    pub check: Check,
    pub payment: Payment,
}

impl Work {
    /// Undo and mark reversed an active payment; missing or already
    /// reversed payments are left alone.
    async fn reverse_payment(&mut self, id: PaymentId) -> ServiceResult<bool> {
        if !self.payments.load(&self.store, id).await? {
            warn!(payment_id = %id, "payment of rejected check no longer exists");
            return Ok(false);
        }
        if !self.payments.get(&id).is_some_and(|p| p.is_active()) {
            return Ok(false);
        }
        self.undo_payment(id).await?;
        let now = self.now;
        self.payments.expect_mut(&id, "payment")?.reverse(now)?;
        Ok(true)
    }
}

impl Services {
    /// Register a check on its own, outside of a payment.
    #[instrument(skip_all, fields(direction = ?input.direction, amount = %input.amount), err)]
    pub async fn create_check(&self, input: NewCheck) -> ServiceResult<Check> {
        match input.counterparty {
            Some(Counterparty::Client(id)) => {
                let _: pelleterp_parties::Client = self.require(id, "client").await?;
            }
            Some(Counterparty::Supplier(id)) => {
                let _: pelleterp_parties::Supplier = self.require(id, "supplier").await?;
            }
            None => {}
        }
        let check = Check::create(input, self.now())?;
        let check = self.commit_one(check).await?;
        info!(check_id = %check.id, status = ?check.status(), "check registered");
        Ok(check)
    }

    pub async fn get_check(&self, id: CheckId) -> ServiceResult<Check> {
        self.require(id, "check").await
    }

    /// Checks matching the query, by payment date.
    pub async fn list_checks(&self, query: &CheckQuery) -> ServiceResult<Vec<Check>> {
        let mut checks: Vec<Check> = self
            .store()
            .list::<Check>()
            .await?
            .into_iter()
            .filter(|c| query.status.is_none_or(|s| c.status() == s))
            .filter(|c| query.direction.is_none_or(|d| c.direction() == d))
            .filter(|c| within(c.payment_date, query.due_after, query.due_before))
            .collect();
        checks.sort_by_key(|c| (c.payment_date, c.created_at));
        Ok(checks)
    }

    /// Move a check along its lifecycle. Rejection reverses the payments
    /// that relied on it.
    #[instrument(skip(self, input), fields(check_id = %id, action = ?input.action), err)]
    pub async fn transition_check(&self, id: CheckId, input: Transition) -> ServiceResult<Check> {
        if input.action == CheckAction::Endorse {
            return Err(DomainError::validation("use the endorse operation to endorse a check").into());
        }
        let mut work = self.work();
        work.checks.require(&work.store, id, "check").await?;
        let now = work.now;
        let check = work.checks.expect_mut(&id, "check")?;
        let status = check.transition(input.action, now, input.note)?;
        let linked = [check.payment_id(), check.endorsement_payment_id()];

        let mut reversed = 0;
        if status == CheckStatus::Rejected {
            for payment_id in linked.into_iter().flatten() {
                if work.reverse_payment(payment_id).await? {
                    reversed += 1;
                }
            }
        }

        let check = work.checks.get(&id).cloned();
        work.commit().await?;
        let check = check.ok_or_else(|| DomainError::not_found(format!("check {id}")))?;
        info!(check_id = %id, status = ?status, reversed_payments = reversed, "check transitioned");
        Ok(committed(check))
    }

    /// Hand a received check to a supplier as payment of purchase invoices.
    /// The check's amount must fit within what those invoices still owe.
    #[instrument(skip(self, input), fields(check_id = %id, supplier_id = %input.supplier_id), err)]
    pub async fn endorse_check(&self, id: CheckId, input: EndorseRequest) -> ServiceResult<Endorsement> {
        let mut work = self.work();
        work.checks.require(&work.store, id, "check").await?;
        work.suppliers
            .require(&work.store, input.supplier_id, "supplier")
            .await?;
        let amount = match work.checks.get(&id) {
            Some(c) if c.direction() == CheckDirection::Received => c.amount(),
            Some(_) => return Err(DomainError::validation("only received checks can be endorsed").into()),
            None => return Err(DomainError::not_found(format!("check {id}")).into()),
        };

        let party = Counterparty::Supplier(input.supplier_id);
        let targets: Vec<AllocationTarget> =
            input.invoice_ids.iter().copied().map(AllocationTarget::Invoice).collect();
        let items = work
            .explicit_items(PaymentDirection::Outgoing, party, &targets)
            .await?;
        let payment_id = work
            .record_payment(
                NewPayment {
                    direction: PaymentDirection::Outgoing,
                    counterparty: party,
                    date: input.date,
                    amount,
                    method: PaymentMethod::Check,
                    check_id: Some(id),
                    notes: input.notes.or_else(|| Some(format!("check {id} endorsed"))),
                },
                &items,
            )
            .await?;
        let now = work.now;
        work.checks
            .expect_mut(&id, "check")?
            .endorse(input.supplier_id, payment_id, now)?;

        let check = work.checks.get(&id).cloned();
        let payment = work.payments.get(&payment_id).cloned();
        work.commit().await?;
        let (Some(check), Some(payment)) = (check, payment) else {
            return Err(DomainError::not_found(format!("check {id}")).into());
        };
        info!(check_id = %id, payment_id = %payment_id, "check endorsed");
        Ok(Endorsement {
            check: committed(check),
            payment: committed(payment),
        })
    }

    /// Pending checks due within `days`, overdue ones included.
    pub async fn upcoming_checks(&self, days: i64) -> ServiceResult<Vec<Check>> {
        let horizon = upcoming_horizon(Utc::now().date_naive(), days)?;
        let mut checks: Vec<Check> = self
            .store()
            .list::<Check>()
            .await?
            .into_iter()
            .filter(|c| c.is_due_by(horizon))
            .collect();
        checks.sort_by_key(|c| c.payment_date);
        Ok(checks)
    }
}
