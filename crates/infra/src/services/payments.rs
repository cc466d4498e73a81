//! Payments and the rules that keep sales, invoices and client credit in step
//! with them.
//!
//! - Allocating a payment records the allocated amounts on its targets; an
//!   incoming excess is credited to the client (`payment_excess`).
//! - Deleting (or reversing) a payment undoes its allocations and the excess
//!   credit; credit-balance payments are refunded to the client.
//! - Releasing a target (sale cancelled/deleted, invoice deleted) moves each
//!   allocated amount into the payment's excess and credits it to the client,
//!   except credit-balance payments, whose amount is refunded instead.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use pelleterp_core::{DomainError, Money};
use pelleterp_invoicing::{Counterparty, InvoiceId, InvoiceKind};
use pelleterp_parties::{CreditEntry, CreditEntryKind};
use pelleterp_sales::SaleId;
use pelleterp_treasury::{
    Allocation, AllocationTarget, Check, CheckDirection, NewCheck, NewPayment, OpenItem, Payment,
    PaymentDirection, PaymentId, PaymentMethod, PaymentStatus, allocate,
};

use super::{ServiceResult, Services, Work, committed, within};

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRequest {
    pub direction: PaymentDirection,
    pub counterparty: Counterparty,
    pub date: NaiveDate,
    pub amount: Money,
    pub method: PaymentMethod,
    /// Check received or issued with the payment (method `check`).
    #[serde(default)]
    pub check: Option<NewCheck>,
    /// Explicit targets, paid in this order.
    #[serde(default)]
    pub targets: Vec<AllocationTarget>,
    /// Pay the counterparty's open items, oldest first.
    #[serde(default)]
    pub auto_allocate: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentQuery {
    pub direction: Option<PaymentDirection>,
    pub counterparty_id: Option<uuid::Uuid>,
    pub status: Option<PaymentStatus>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordedPayment {
    pub payment: Payment,
    pub check: Option<Check>,
}

impl Work {
    /// Load the record an allocation points at (and a sale's invoice).
    /// Returns whether the target exists.
    pub(crate) async fn load_target(&mut self, target: AllocationTarget) -> ServiceResult<bool> {
        match target {
            AllocationTarget::Sale(id) => {
                if !self.sales.load(&self.store, id).await? {
                    return Ok(false);
                }
                if let Some(invoice) = self.sales.get(&id).and_then(|s| s.invoice_id()) {
                    self.invoices.load(&self.store, InvoiceId(invoice)).await?;
                }
                Ok(true)
            }
            AllocationTarget::Invoice(id) => self.invoices.load(&self.store, id).await,
        }
    }

    /// Keep a sale-linked invoice's paid amount equal to its sale's.
    pub(crate) fn mirror_sale_invoice(&mut self, sale_id: SaleId) {
        let Some(sale) = self.sales.get(&sale_id) else {
            return;
        };
        let Some(invoice_id) = sale.invoice_id() else {
            return;
        };
        let linked = self
            .invoices
            .get(&InvoiceId(invoice_id))
            .is_some_and(|i| i.sale_id() == Some(sale_id) && !i.is_cancelled());
        if linked {
            if let Some(invoice) = self.invoices.get_mut(&InvoiceId(invoice_id)) {
                invoice.mirror_sale(sale);
            }
        }
    }

    fn apply_allocation(&mut self, allocation: Allocation, from_credit: bool) -> ServiceResult<()> {
        match allocation.target {
            AllocationTarget::Sale(id) => {
                self.sales
                    .expect_mut(&id, "sale")?
                    .record_payment(allocation.amount, from_credit)?;
                self.mirror_sale_invoice(id);
            }
            AllocationTarget::Invoice(id) => {
                self.invoices
                    .expect_mut(&id, "invoice")?
                    .record_payment(allocation.amount)?;
            }
        }
        Ok(())
    }

    /// Take an allocation back from its target; a missing target is skipped.
    fn undo_allocation(&mut self, allocation: Allocation, from_credit: bool) -> ServiceResult<()> {
        match allocation.target {
            AllocationTarget::Sale(id) => {
                if let Some(sale) = self.sales.get_mut(&id) {
                    sale.release_payment(allocation.amount, from_credit)?;
                    self.mirror_sale_invoice(id);
                }
            }
            AllocationTarget::Invoice(id) => {
                if let Some(invoice) = self.invoices.get_mut(&id) {
                    invoice.release_payment(allocation.amount)?;
                }
            }
        }
        Ok(())
    }

    /// Post a credit movement for the client behind `party` (no-op for
    /// suppliers). A client that no longer exists is skipped.
    async fn credit_client(&mut self, party: Counterparty, entry: CreditEntry) -> ServiceResult<()> {
        let Counterparty::Client(id) = party else {
            return Ok(());
        };
        if !self.clients.load(&self.store, id).await? {
            warn!(client_id = %id, "credit movement skipped: client no longer exists");
            return Ok(());
        }
        self.clients.expect_mut(&id, "client")?.post_credit(entry)?;
        Ok(())
    }

    /// Release every active allocation on `target` following the release
    /// rule. Returns the total released.
    pub(crate) async fn release_allocations(&mut self, target: AllocationTarget) -> ServiceResult<Money> {
        self.load_target(target).await?;
        self.payments.load_all(&self.store, |p| p.id).await?;
        let holders: Vec<PaymentId> = self
            .payments
            .values()
            .filter(|p| p.is_active() && p.allocated_to(target).is_positive())
            .map(|p| p.id)
            .collect();

        let now = self.now;
        let mut total = Money::ZERO;
        for id in holders {
            let payment = self.payments.expect_mut(&id, "payment")?;
            let released = payment.release(target, now)?;
            let (direction, method, party) =
                (payment.direction(), payment.method(), payment.counterparty());
            if released.is_zero() {
                continue;
            }
            let from_credit = method == PaymentMethod::CreditBalance;
            self.undo_allocation(
                Allocation {
                    target,
                    amount: released,
                },
                from_credit,
            )?;

            if direction == PaymentDirection::Incoming {
                let mut entry = if from_credit {
                    CreditEntry::new(released, CreditEntryKind::Reversal, now)
                        .with_note(format!("credit refunded, {target} released"))
                } else {
                    CreditEntry::new(released, CreditEntryKind::PaymentExcess, now)
                        .with_note(format!("{target} released"))
                };
                entry = entry.for_payment(id.0);
                if let AllocationTarget::Sale(sale) = target {
                    entry = entry.for_sale(sale.0);
                }
                self.credit_client(party, entry).await?;
            }
            total = total.checked_add(released)?;
        }
        if total.is_positive() {
            info!(%target, released = %total, "payment allocations released");
        }
        Ok(total)
    }

    /// Undo everything an active payment did: its allocations and its effect
    /// on the client's credit. The payment record itself is left alone.
    pub(crate) async fn undo_payment(&mut self, id: PaymentId) -> ServiceResult<()> {
        self.payments.require(&self.store, id, "payment").await?;
        let Some(payment) = self.payments.get(&id).cloned() else {
            return Err(DomainError::not_found(format!("payment {id}")).into());
        };
        if !payment.is_active() {
            return Ok(());
        }

        let from_credit = payment.method() == PaymentMethod::CreditBalance;
        for a in payment.allocations() {
            self.load_target(a.target).await?;
        }
        for a in payment.allocations() {
            self.undo_allocation(*a, from_credit)?;
        }

        if payment.direction() == PaymentDirection::Incoming {
            let now = self.now;
            if from_credit {
                let refund = Money::sum(payment.allocations().iter().map(|a| a.amount))?;
                if refund.is_positive() {
                    let entry = CreditEntry::new(refund, CreditEntryKind::Reversal, now)
                        .for_payment(id.0)
                        .with_note("credit payment undone");
                    self.credit_client(payment.counterparty(), entry).await?;
                }
            } else if payment.excess().is_positive() {
                let entry = CreditEntry::new(-payment.excess(), CreditEntryKind::Reversal, now)
                    .for_payment(id.0)
                    .with_note("payment excess undone");
                self.credit_client(payment.counterparty(), entry).await?;
            }
        }
        Ok(())
    }

    /// Open items for explicit targets, validated against the payment.
    pub(crate) async fn explicit_items(
        &mut self,
        direction: PaymentDirection,
        party: Counterparty,
        targets: &[AllocationTarget],
    ) -> ServiceResult<Vec<OpenItem>> {
        let unique: BTreeSet<_> = targets.iter().collect();
        if unique.len() != targets.len() {
            return Err(DomainError::validation("a target can only be listed once").into());
        }

        let mut items = Vec::with_capacity(targets.len());
        for &target in targets {
            if !self.load_target(target).await? {
                return Err(DomainError::not_found(target.to_string()).into());
            }
            let outstanding = match target {
                AllocationTarget::Sale(id) => {
                    if direction != PaymentDirection::Incoming {
                        return Err(DomainError::validation("only incoming payments pay sales").into());
                    }
                    let sale = self.sales.get(&id).ok_or_else(|| DomainError::not_found(target.to_string()))?;
                    if Counterparty::Client(sale.client_id) != party {
                        return Err(DomainError::validation(format!("{target} belongs to another client")).into());
                    }
                    if sale.is_cancelled() {
                        return Err(DomainError::conflict(format!("{target} is cancelled")).into());
                    }
                    sale.outstanding()
                }
                AllocationTarget::Invoice(id) => {
                    let invoice = self
                        .invoices
                        .get(&id)
                        .ok_or_else(|| DomainError::not_found(target.to_string()))?;
                    let expected_kind = match direction {
                        PaymentDirection::Incoming => InvoiceKind::Sale,
                        PaymentDirection::Outgoing => InvoiceKind::Purchase,
                    };
                    if invoice.kind() != expected_kind {
                        return Err(DomainError::validation(format!(
                            "{target} cannot be paid by an {direction:?} payment"
                        ).to_lowercase())
                        .into());
                    }
                    if invoice.counterparty() != party {
                        return Err(DomainError::validation(format!("{target} belongs to another party")).into());
                    }
                    if let Some(sale) = invoice.sale_id() {
                        return Err(DomainError::conflict(format!(
                            "{target} is linked to sale {sale}; pay the sale instead"
                        ))
                        .into());
                    }
                    if invoice.is_cancelled() {
                        return Err(DomainError::conflict(format!("{target} is cancelled")).into());
                    }
                    invoice.outstanding()
                }
            };
            items.push(OpenItem { target, outstanding });
        }
        Ok(items)
    }

    /// Open sales and unlinked invoices of the counterparty, by date then
    /// creation.
    async fn open_items_of(
        &mut self,
        direction: PaymentDirection,
        party: Counterparty,
    ) -> ServiceResult<Vec<OpenItem>> {
        self.invoices.load_all(&self.store, |i| i.id).await?;
        let mut dated = Vec::new();
        if let (PaymentDirection::Incoming, Counterparty::Client(client)) = (direction, party) {
            self.sales.load_all(&self.store, |s| s.id).await?;
            dated.extend(
                self.sales
                    .values()
                    .filter(|s| s.client_id == client && s.outstanding().is_positive())
                    .map(|s| {
                        (s.date, s.created_at, OpenItem {
                            target: AllocationTarget::Sale(s.id),
                            outstanding: s.outstanding(),
                        })
                    }),
            );
        }
        dated.extend(
            self.invoices
                .values()
                .filter(|i| i.counterparty() == party && i.accepts_payments())
                .filter(|i| i.outstanding().is_positive())
                .map(|i| {
                    (i.issue_date, i.created_at, OpenItem {
                        target: AllocationTarget::Invoice(i.id),
                        outstanding: i.outstanding(),
                    })
                }),
        );
        dated.sort_by_key(|(date, created, _)| (*date, *created));
        Ok(dated.into_iter().map(|(_, _, item)| item).collect())
    }

    /// Record a payment over `items` and apply it to its targets and the
    /// client's credit. Linking a check is left to the caller.
    pub(crate) async fn record_payment(
        &mut self,
        input: NewPayment,
        items: &[OpenItem],
    ) -> ServiceResult<PaymentId> {
        let plan = allocate(input.amount, items)?;
        let party = input.counterparty;
        let payment = Payment::record(input, plan, self.now)?;
        let id = payment.id;
        let from_credit = payment.method() == PaymentMethod::CreditBalance;

        for a in payment.allocations() {
            self.apply_allocation(*a, from_credit)?;
        }

        if payment.direction() == PaymentDirection::Incoming {
            if from_credit {
                let entry = CreditEntry::new(-payment.amount(), CreditEntryKind::AppliedToSale, self.now)
                    .for_payment(id.0);
                let entry = match payment.allocations() {
                    [Allocation {
                        target: AllocationTarget::Sale(sale),
                        ..
                    }] => entry.for_sale(sale.0),
                    _ => entry,
                };
                let Counterparty::Client(client) = party else {
                    return Err(DomainError::validation("credit balance belongs to a client").into());
                };
                self.clients.require(&self.store, client, "client").await?;
                self.clients.expect_mut(&client, "client")?.post_credit(entry)?;
            } else if payment.excess().is_positive() {
                let entry = CreditEntry::new(payment.excess(), CreditEntryKind::PaymentExcess, self.now)
                    .for_payment(id.0)
                    .with_note("payment excess");
                self.credit_client(party, entry).await?;
            }
        }

        self.payments.insert(id, payment);
        Ok(id)
    }
}

impl Services {
    /// Record a payment, its allocations and (for method `check`) its check
    /// in one commit.
    #[instrument(skip_all, fields(direction = ?input.direction, amount = %input.amount), err)]
    pub async fn create_payment(&self, input: PaymentRequest) -> ServiceResult<RecordedPayment> {
        if input.auto_allocate && !input.targets.is_empty() {
            return Err(DomainError::validation("give explicit targets or auto_allocate, not both").into());
        }
        let mut work = self.work();
        match input.counterparty {
            Counterparty::Client(id) => work.clients.require(&work.store, id, "client").await?,
            Counterparty::Supplier(id) => work.suppliers.require(&work.store, id, "supplier").await?,
        }

        let items = if input.auto_allocate {
            work.open_items_of(input.direction, input.counterparty).await?
        } else {
            work.explicit_items(input.direction, input.counterparty, &input.targets)
                .await?
        };

        let check_id = match (input.method, input.check) {
            (PaymentMethod::Check, Some(check)) => {
                let expected = match input.direction {
                    PaymentDirection::Incoming => CheckDirection::Received,
                    PaymentDirection::Outgoing => CheckDirection::Issued,
                };
                if check.direction != expected {
                    return Err(DomainError::validation(format!(
                        "an {:?} payment needs a {:?} check",
                        input.direction, expected
                    ).to_lowercase())
                    .into());
                }
                if check.amount != input.amount {
                    return Err(DomainError::validation("check amount must equal the payment amount").into());
                }
                let check = Check::create(check, work.now)?;
                let id = check.id;
                work.checks.insert(id, check);
                Some(id)
            }
            (PaymentMethod::Check, None) => {
                return Err(DomainError::validation("check payments need check data").into());
            }
            (_, Some(_)) => {
                return Err(DomainError::validation("only check payments carry a check").into());
            }
            (_, None) => None,
        };

        let id = work
            .record_payment(
                NewPayment {
                    direction: input.direction,
                    counterparty: input.counterparty,
                    date: input.date,
                    amount: input.amount,
                    method: input.method,
                    check_id,
                    notes: input.notes,
                },
                &items,
            )
            .await?;
        if let Some(check_id) = check_id {
            work.checks
                .expect_mut(&check_id, "check")?
                .attach_payment(id, input.counterparty)?;
        }

        let payment = work.payments.get(&id).cloned();
        let check = check_id.and_then(|c| work.checks.get(&c).cloned());
        work.commit().await?;

        let payment = payment.ok_or_else(|| DomainError::not_found(format!("payment {id}")))?;
        info!(
            payment_id = %id,
            allocated = payment.allocations().len(),
            excess = %payment.excess(),
            "payment recorded"
        );
        Ok(RecordedPayment {
            payment: committed(payment),
            check: check.map(committed),
        })
    }

    pub async fn get_payment(&self, id: PaymentId) -> ServiceResult<Payment> {
        self.require(id, "payment").await
    }

    /// Payments matching the query, most recent first.
    pub async fn list_payments(&self, query: &PaymentQuery) -> ServiceResult<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .store()
            .list::<Payment>()
            .await?
            .into_iter()
            .filter(|p| query.direction.is_none_or(|d| p.direction() == d))
            .filter(|p| query.status.is_none_or(|s| p.status() == s))
            .filter(|p| {
                query
                    .counterparty_id
                    .is_none_or(|c| *p.counterparty().aggregate_id().as_uuid() == c)
            })
            .filter(|p| within(p.date, query.from, query.to))
            .collect();
        payments.sort_by(|a, b| b.date.cmp(&a.date).then(b.created_at.cmp(&a.created_at)));
        Ok(payments)
    }

    /// Delete a payment, undoing its allocations and credit movements. Its
    /// check goes with it while untouched; a check that already moved on
    /// (deposited, endorsed...) blocks the delete.
    #[instrument(skip(self), fields(payment_id = %id), err)]
    pub async fn delete_payment(&self, id: PaymentId) -> ServiceResult<()> {
        let mut work = self.work();
        work.payments.require(&work.store, id, "payment").await?;
        let check_id = work.payments.get(&id).and_then(|p| p.check_id());

        if let Some(check_id) = check_id {
            if work.checks.load(&work.store, check_id).await? {
                let untouched = work.checks.get(&check_id).is_some_and(|c| c.is_untouched());
                if !untouched {
                    return Err(DomainError::conflict(format!(
                        "check {check_id} has already been processed; reject it instead"
                    ))
                    .into());
                }
                work.checks.remove(&check_id);
            }
        }

        work.undo_payment(id).await?;
        work.payments.remove(&id);
        work.commit().await?;
        info!(payment_id = %id, "payment deleted");
        Ok(())
    }
}
