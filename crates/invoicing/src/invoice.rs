use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use pelleterp_core::{
    AggregateId, DomainError, DomainResult, Money, SettlementStatus, entity_id, impl_document,
};
use pelleterp_inventory::{MovementKind, MovementSource, StockId, SupplyId, SupplyMovement, SupplyStock};
use pelleterp_parties::{Client, ClientId, Supplier, SupplierId};
use pelleterp_sales::{Sale, SaleId};

use crate::letter::{InvoiceLetter, InvoiceNumber};
use crate::tax::{TaxRate, Totals, line_amounts};

entity_id!(InvoiceId, "invoice id");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceKind {
    /// Issued by us to a client.
    Sale,
    /// Received from a supplier.
    Purchase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Counterparty {
    Client(ClientId),
    Supplier(SupplierId),
}

impl Counterparty {
    pub fn aggregate_id(&self) -> AggregateId {
        match self {
            Counterparty::Client(id) => id.0,
            Counterparty::Supplier(id) => id.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LineInput {
    pub description: String,
    pub quantity: i64,
    pub unit_price: Money,
    #[serde(default)]
    pub tax_rate: TaxRate,
    #[serde(default)]
    pub stock_id: Option<StockId>,
    #[serde(default)]
    pub supply_id: Option<SupplyId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewSaleInvoice {
    pub client_id: ClientId,
    #[serde(default)]
    pub sale_id: Option<SaleId>,
    pub issue_date: NaiveDate,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    /// Defaults to the sale's lines at the general rate.
    #[serde(default)]
    pub lines: Vec<LineInput>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewPurchaseInvoice {
    pub supplier_id: SupplierId,
    /// Number printed on the supplier's invoice.
    pub number: InvoiceNumber,
    #[serde(default)]
    pub letter: Option<InvoiceLetter>,
    pub issue_date: NaiveDate,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    pub lines: Vec<LineInput>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub description: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub tax_rate: TaxRate,
    pub stock_id: Option<StockId>,
    pub supply_id: Option<SupplyId>,
    pub subtotal: Money,
    pub tax: Money,
}

/// A sale or purchase invoice.
///
/// Invariants: `total == subtotal + tax` (computed from the lines on
/// construction) and `status` derived from `total`/`amount_paid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    kind: InvoiceKind,
    letter: InvoiceLetter,
    number: InvoiceNumber,
    counterparty: Counterparty,
    pub counterparty_name: String,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    sale_id: Option<SaleId>,
    lines: Vec<InvoiceLine>,
    #[serde(flatten)]
    totals: Totals,
    amount_paid: Money,
    status: SettlementStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl_document!(Invoice, "invoices");

fn build_lines(inputs: &[LineInput], letter: InvoiceLetter) -> DomainResult<Vec<InvoiceLine>> {
    if inputs.is_empty() {
        return Err(DomainError::validation("an invoice needs at least one line"));
    }
    inputs
        .iter()
        .map(|l| {
            let description = l.description.trim();
            if description.is_empty() {
                return Err(DomainError::validation("line description is required"));
            }
            if l.quantity <= 0 {
                return Err(DomainError::validation("line quantity must be positive"));
            }
            l.unit_price.ensure_positive("unit price")?;
            let (subtotal, tax) =
                line_amounts(l.quantity, l.unit_price, l.tax_rate, letter.discriminates_tax())?;
            Ok(InvoiceLine {
                description: description.to_string(),
                quantity: l.quantity,
                unit_price: l.unit_price,
                tax_rate: l.tax_rate,
                stock_id: l.stock_id,
                supply_id: l.supply_id,
                subtotal,
                tax,
            })
        })
        .collect()
}

fn check_dates(issue: NaiveDate, due: Option<NaiveDate>) -> DomainResult<()> {
    match due {
        Some(due) if due < issue => Err(DomainError::validation(
            "due date cannot be before the issue date",
        )),
        _ => Ok(()),
    }
}

impl Invoice {
    /// Build a sale invoice numbered `number`.
    ///
    /// With a `sale`, the sale must belong to `client`, be live and not
    /// already invoiced; its lines are used when none are given and its paid
    /// amount is mirrored. The caller links the sale to the invoice.
    pub fn for_sale(
        input: NewSaleInvoice,
        client: &Client,
        sale: Option<&Sale>,
        number: InvoiceNumber,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if input.client_id != client.id {
            return Err(DomainError::validation("client does not match the invoice"));
        }
        check_dates(input.issue_date, input.due_date)?;
        let letter = InvoiceLetter::for_client(client.tax_condition);

        let mut amount_paid = Money::ZERO;
        let mut inputs = input.lines;
        if let Some(sale) = sale {
            if Some(sale.id) != input.sale_id {
                return Err(DomainError::validation("sale does not match the invoice"));
            }
            if sale.client_id != client.id {
                return Err(DomainError::validation("sale belongs to another client"));
            }
            if sale.is_cancelled() {
                return Err(DomainError::conflict("cannot invoice a cancelled sale"));
            }
            if let Some(existing) = sale.invoice_id() {
                return Err(DomainError::conflict(format!(
                    "sale is already invoiced ({existing})"
                )));
            }
            if inputs.is_empty() {
                inputs = sale
                    .lines()
                    .iter()
                    .map(|l| LineInput {
                        description: l.description.clone(),
                        quantity: l.quantity,
                        unit_price: l.unit_price,
                        tax_rate: TaxRate::GENERAL,
                        stock_id: Some(l.stock_id),
                        supply_id: None,
                    })
                    .collect();
            }
            amount_paid = sale.amount_paid();
        } else if input.sale_id.is_some() {
            return Err(DomainError::not_found("sale"));
        }

        if inputs.iter().any(|l| l.supply_id.is_some()) {
            return Err(DomainError::validation(
                "sale invoice lines cannot reference supplies",
            ));
        }
        let lines = build_lines(&inputs, letter)?;
        let totals = Totals::from_lines(lines.iter().map(|l| (l.subtotal, l.tax)))?;

        Ok(Self {
            id: InvoiceId::new(),
            kind: InvoiceKind::Sale,
            letter,
            number,
            counterparty: Counterparty::Client(client.id),
            counterparty_name: client.name.clone(),
            issue_date: input.issue_date,
            due_date: input.due_date,
            sale_id: input.sale_id,
            lines,
            totals,
            amount_paid,
            status: SettlementStatus::derive(totals.total, amount_paid, false),
            notes: input.notes.filter(|n| !n.trim().is_empty()),
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    /// Build a purchase invoice and add the lines that reference a supply to
    /// `supplies` (which must hold every referenced supply).
    pub fn for_purchase(
        input: NewPurchaseInvoice,
        supplier: &Supplier,
        supplies: &mut BTreeMap<SupplyId, SupplyStock>,
        now: DateTime<Utc>,
    ) -> DomainResult<(Self, Vec<SupplyMovement>)> {
        if input.supplier_id != supplier.id {
            return Err(DomainError::validation("supplier does not match the invoice"));
        }
        check_dates(input.issue_date, input.due_date)?;
        let letter = InvoiceLetter::for_supplier(supplier.tax_condition, input.letter);
        let lines = build_lines(&input.lines, letter)?;
        let totals = Totals::from_lines(lines.iter().map(|l| (l.subtotal, l.tax)))?;

        let invoice = Self {
            id: InvoiceId::new(),
            kind: InvoiceKind::Purchase,
            letter,
            number: input.number,
            counterparty: Counterparty::Supplier(supplier.id),
            counterparty_name: supplier.name.clone(),
            issue_date: input.issue_date,
            due_date: input.due_date,
            sale_id: None,
            lines,
            totals,
            amount_paid: Money::ZERO,
            status: SettlementStatus::Pending,
            notes: input.notes.filter(|n| !n.trim().is_empty()),
            created_at: now,
            updated_at: now,
            version: 0,
        };

        let mut movements = Vec::new();
        for line in &invoice.lines {
            let Some(supply_id) = line.supply_id else {
                continue;
            };
            let supply = supplies
                .get_mut(&supply_id)
                .ok_or_else(|| DomainError::not_found(format!("supply {supply_id}")))?;
            if line.unit_price.is_positive() {
                supply.unit_cost = Some(line.unit_price);
            }
            movements.push(supply.apply(
                line.quantity,
                MovementKind::Purchase,
                MovementSource::invoice(invoice.id.0),
                Some(format!("invoice {}", invoice.number)),
                now,
            )?);
        }
        Ok((invoice, movements))
    }

    pub fn kind(&self) -> InvoiceKind {
        self.kind
    }

    pub fn letter(&self) -> InvoiceLetter {
        self.letter
    }

    pub fn number(&self) -> InvoiceNumber {
        self.number
    }

    pub fn counterparty(&self) -> Counterparty {
        self.counterparty
    }

    pub fn sale_id(&self) -> Option<SaleId> {
        self.sale_id
    }

    pub fn lines(&self) -> &[InvoiceLine] {
        &self.lines
    }

    pub fn subtotal(&self) -> Money {
        self.totals.subtotal
    }

    pub fn tax(&self) -> Money {
        self.totals.tax
    }

    pub fn total(&self) -> Money {
        self.totals.total
    }

    pub fn amount_paid(&self) -> Money {
        self.amount_paid
    }

    pub fn status(&self) -> SettlementStatus {
        self.status
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == SettlementStatus::Cancelled
    }

    pub fn outstanding(&self) -> Money {
        if self.is_cancelled() {
            return Money::ZERO;
        }
        Money::outstanding(self.totals.total, self.amount_paid)
    }

    /// Whether payments can be allocated to this invoice directly.
    pub fn accepts_payments(&self) -> bool {
        self.sale_id.is_none() && !self.is_cancelled()
    }

    fn refresh_status(&mut self) {
        self.status =
            SettlementStatus::derive(self.totals.total, self.amount_paid, self.is_cancelled());
    }

    pub fn record_payment(&mut self, amount: Money) -> DomainResult<()> {
        amount.ensure_positive("payment amount")?;
        if let Some(sale) = self.sale_id {
            return Err(DomainError::conflict(format!(
                "invoice {} is linked to sale {sale}; pay the sale instead",
                self.number
            )));
        }
        if self.is_cancelled() {
            return Err(DomainError::conflict("cannot pay a cancelled invoice"));
        }
        if amount > self.outstanding() {
            return Err(DomainError::invariant(format!(
                "payment of {amount} exceeds the outstanding {} of invoice {}",
                self.outstanding(),
                self.number
            )));
        }
        self.amount_paid = self.amount_paid.checked_add(amount)?;
        self.refresh_status();
        Ok(())
    }

    pub fn release_payment(&mut self, amount: Money) -> DomainResult<()> {
        amount.ensure_positive("released amount")?;
        let paid = self.amount_paid.checked_sub(amount)?;
        if paid.is_negative() {
            return Err(DomainError::invariant(format!(
                "cannot release {amount}, invoice {} only has {} paid",
                self.number, self.amount_paid
            )));
        }
        self.amount_paid = paid;
        self.refresh_status();
        Ok(())
    }

    /// Copy the paid amount of the linked sale.
    pub fn mirror_sale(&mut self, sale: &Sale) -> bool {
        self.resync_paid(sale.amount_paid())
    }

    /// Overwrite the paid amount with a recomputed one. Returns `true` when
    /// anything changed.
    pub fn resync_paid(&mut self, paid: Money) -> bool {
        let before = (self.amount_paid, self.status);
        self.amount_paid = paid.max(Money::ZERO);
        self.refresh_status();
        before != (self.amount_paid, self.status)
    }

    pub fn unlink_sale(&mut self) -> Option<SaleId> {
        self.sale_id.take()
    }

    /// Undo the supply additions of a purchase invoice. Supplies that no
    /// longer exist are skipped.
    pub fn reverse_purchases(
        &self,
        supplies: &mut BTreeMap<SupplyId, SupplyStock>,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<SupplyMovement>> {
        let mut movements = Vec::new();
        if self.kind != InvoiceKind::Purchase || self.is_cancelled() {
            return Ok(movements);
        }
        for line in &self.lines {
            let Some(supply) = line.supply_id.and_then(|id| supplies.get_mut(&id)) else {
                continue;
            };
            movements.push(supply.apply(
                -line.quantity,
                MovementKind::PurchaseReversal,
                MovementSource::invoice(self.id.0),
                Some(format!("invoice {} reversed", self.number)),
                now,
            )?);
        }
        Ok(movements)
    }

    /// Cancel the invoice, reversing purchase movements. Rejected while
    /// payments are allocated to it.
    pub fn cancel(
        &mut self,
        supplies: &mut BTreeMap<SupplyId, SupplyStock>,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<SupplyMovement>> {
        if self.is_cancelled() {
            return Err(DomainError::conflict("invoice is already cancelled"));
        }
        if self.sale_id.is_none() && self.amount_paid.is_positive() {
            return Err(DomainError::conflict(
                "invoice has payments allocated; delete them first",
            ));
        }
        let movements = self.reverse_purchases(supplies, now)?;
        self.status = SettlementStatus::Cancelled;
        self.updated_at = now;
        Ok(movements)
    }
}
