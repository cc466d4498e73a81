use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use pelleterp_core::{
    AggregateId, DomainError, DomainResult, Money, SettlementStatus, entity_id, impl_document,
};
use pelleterp_inventory::{MovementKind, MovementSource, Stock, StockId, StockMovement};
use pelleterp_parties::ClientId;

entity_id!(SaleId, "sale id");

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SaleLineInput {
    pub stock_id: StockId,
    #[serde(default)]
    pub description: Option<String>,
    pub quantity: i64,
    pub unit_price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewSale {
    pub client_id: ClientId,
    pub date: NaiveDate,
    pub lines: Vec<SaleLineInput>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Pay as much as possible from the client's credit balance.
    #[serde(default)]
    pub apply_credit: bool,
    /// Skip the duplicate guard.
    #[serde(default)]
    pub allow_duplicate: bool,
}

/// Only the date and notes of a sale can be edited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SalePatch {
    pub date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub stock_id: StockId,
    pub description: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub line_total: Money,
}

/// A sale of finished stock to a client.
///
/// Invariants: `total == Σ line_total`, `0 <= amount_paid <= total`,
/// `credit_applied <= amount_paid` and `status` derived from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub id: SaleId,
    pub client_id: ClientId,
    pub date: NaiveDate,
    lines: Vec<SaleLine>,
    total: Money,
    amount_paid: Money,
    credit_applied: Money,
    status: SettlementStatus,
    invoice_id: Option<AggregateId>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl_document!(Sale, "sales");

impl Sale {
    /// Build a sale and take its lines out of `stocks`.
    ///
    /// `stocks` must hold every referenced item; they are mutated in place and
    /// the `sale` movements are returned.
    pub fn create(
        input: &NewSale,
        stocks: &mut BTreeMap<StockId, Stock>,
        now: DateTime<Utc>,
    ) -> DomainResult<(Self, Vec<StockMovement>)> {
        if input.lines.is_empty() {
            return Err(DomainError::validation("a sale needs at least one line"));
        }

        let id = SaleId::new();
        let mut lines = Vec::with_capacity(input.lines.len());
        let mut movements = Vec::with_capacity(input.lines.len());
        for l in &input.lines {
            if l.quantity <= 0 {
                return Err(DomainError::validation("line quantity must be positive"));
            }
            l.unit_price.ensure_positive("unit price")?;
            let stock = stocks
                .get_mut(&l.stock_id)
                .ok_or_else(|| DomainError::not_found(format!("stock {}", l.stock_id)))?;
            if !stock.active {
                return Err(DomainError::validation(format!(
                    "stock '{}' is inactive",
                    stock.name
                )));
            }
            movements.push(stock.apply(
                -l.quantity,
                MovementKind::Sale,
                MovementSource::sale(id.0),
                None,
                now,
            )?);
            lines.push(SaleLine {
                stock_id: l.stock_id,
                description: l
                    .description
                    .clone()
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or_else(|| stock.name.clone()),
                quantity: l.quantity,
                unit_price: l.unit_price,
                line_total: l.unit_price.times(l.quantity)?,
            });
        }

        let total = Money::sum(lines.iter().map(|l| l.line_total))?;
        let sale = Self {
            id,
            client_id: input.client_id,
            date: input.date,
            lines,
            total,
            amount_paid: Money::ZERO,
            credit_applied: Money::ZERO,
            status: SettlementStatus::Pending,
            invoice_id: None,
            notes: input.notes.clone().filter(|n| !n.trim().is_empty()),
            created_at: now,
            updated_at: now,
            version: 0,
        };
        Ok((sale, movements))
    }

    pub fn lines(&self) -> &[SaleLine] {
        &self.lines
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn amount_paid(&self) -> Money {
        self.amount_paid
    }

    pub fn credit_applied(&self) -> Money {
        self.credit_applied
    }

    pub fn outstanding(&self) -> Money {
        if self.is_cancelled() {
            return Money::ZERO;
        }
        Money::outstanding(self.total, self.amount_paid)
    }

    pub fn status(&self) -> SettlementStatus {
        self.status
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == SettlementStatus::Cancelled
    }

    pub fn invoice_id(&self) -> Option<AggregateId> {
        self.invoice_id
    }

    fn refresh_status(&mut self) {
        self.status = SettlementStatus::derive(self.total, self.amount_paid, self.is_cancelled());
    }

    pub fn apply_patch(&mut self, patch: SalePatch, now: DateTime<Utc>) {
        if let Some(date) = patch.date {
            self.date = date;
        }
        if let Some(notes) = patch.notes {
            self.notes = Some(notes).filter(|n| !n.trim().is_empty());
        }
        self.updated_at = now;
    }

    /// Record part of a payment allocated to this sale. `from_credit` marks
    /// amounts paid out of the client's credit balance.
    pub fn record_payment(&mut self, amount: Money, from_credit: bool) -> DomainResult<()> {
        amount.ensure_positive("payment amount")?;
        if self.is_cancelled() {
            return Err(DomainError::conflict("cannot pay a cancelled sale"));
        }
        if amount > self.outstanding() {
            return Err(DomainError::invariant(format!(
                "payment of {amount} exceeds the outstanding {} of the sale",
                self.outstanding()
            )));
        }
        self.amount_paid = self.amount_paid.checked_add(amount)?;
        if from_credit {
            self.credit_applied = self.credit_applied.checked_add(amount)?;
        }
        self.refresh_status();
        Ok(())
    }

    /// Undo part of a previously recorded payment.
    pub fn release_payment(&mut self, amount: Money, from_credit: bool) -> DomainResult<()> {
        amount.ensure_positive("released amount")?;
        let paid = self.amount_paid.checked_sub(amount)?;
        if paid.is_negative() {
            return Err(DomainError::invariant(format!(
                "cannot release {amount}, the sale only has {} paid",
                self.amount_paid
            )));
        }
        self.amount_paid = paid;
        if from_credit {
            self.credit_applied = self.credit_applied.checked_sub(amount)?.max(Money::ZERO);
        }
        self.credit_applied = self.credit_applied.min(self.amount_paid);
        self.refresh_status();
        Ok(())
    }

    /// Overwrite the paid amounts with values recomputed from allocations.
    /// Returns `true` when anything changed.
    pub fn resync_paid(&mut self, paid: Money, from_credit: Money) -> bool {
        let paid = paid.max(Money::ZERO);
        let from_credit = from_credit.max(Money::ZERO).min(paid);
        let before = (self.amount_paid, self.credit_applied, self.status);
        self.amount_paid = paid;
        self.credit_applied = from_credit;
        self.refresh_status();
        before != (self.amount_paid, self.credit_applied, self.status)
    }

    pub fn link_invoice(&mut self, invoice_id: AggregateId) -> DomainResult<()> {
        if self.is_cancelled() {
            return Err(DomainError::conflict("cannot invoice a cancelled sale"));
        }
        match self.invoice_id {
            Some(existing) if existing != invoice_id => Err(DomainError::conflict(format!(
                "sale is already invoiced ({existing})"
            ))),
            _ => {
                self.invoice_id = Some(invoice_id);
                Ok(())
            }
        }
    }

    pub fn unlink_invoice(&mut self) -> Option<AggregateId> {
        self.invoice_id.take()
    }

    /// Put the sold quantities back into `stocks` and mark the sale cancelled.
    ///
    /// Payments must have been released beforehand. Stock items that no
    /// longer exist are skipped.
    pub fn cancel(
        &mut self,
        stocks: &mut BTreeMap<StockId, Stock>,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<StockMovement>> {
        if self.is_cancelled() {
            return Err(DomainError::conflict("sale is already cancelled"));
        }
        if self.amount_paid.is_positive() {
            return Err(DomainError::conflict(
                "release the sale's payments before cancelling it",
            ));
        }
        let mut movements = Vec::new();
        for line in &self.lines {
            if let Some(stock) = stocks.get_mut(&line.stock_id) {
                movements.push(stock.apply(
                    line.quantity,
                    MovementKind::SaleReversal,
                    MovementSource::sale(self.id.0),
                    None,
                    now,
                )?);
            }
        }
        self.status = SettlementStatus::Cancelled;
        self.updated_at = now;
        Ok(movements)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pelleterp_inventory::{NewStock, Unit};

    pub(crate) fn stock(quantity: i64) -> Stock {
        Stock::create(
            NewStock {
                name: "Pellet bolsa 25 kg".into(),
                unit: Unit::Bag,
                quantity,
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap()
        .0
    }

    pub(crate) fn new_sale(client: ClientId, stock_id: StockId, qty: i64, price: i64) -> NewSale {
        NewSale {
            client_id: client,
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            lines: vec![SaleLineInput {
                stock_id,
                description: None,
                quantity: qty,
                unit_price: Money::from_cents(price),
            }],
            notes: None,
            apply_credit: false,
            allow_duplicate: false,
        }
    }

    fn setup(qty: i64) -> (BTreeMap<StockId, Stock>, StockId) {
        let s = stock(qty);
        let id = s.id;
        (BTreeMap::from([(id, s)]), id)
    }

    #[test]
    fn create_computes_total_and_takes_stock() {
        let (mut stocks, sid) = setup(10);
        let (sale, movements) =
            Sale::create(&new_sale(ClientId::new(), sid, 4, 1_500), &mut stocks, Utc::now())
                .unwrap();
        assert_eq!(sale.total(), Money::from_cents(6_000));
        assert_eq!(sale.status(), SettlementStatus::Pending);
        assert_eq!(sale.lines()[0].description, "Pellet bolsa 25 kg");
        assert_eq!(stocks[&sid].quantity(), 6);
        assert_eq!(movements[0].delta, -4);
        assert!(movements[0].source.is(pelleterp_inventory::SourceKind::Sale, sale.id.0));
    }

    #[test]
    fn insufficient_stock_is_rejected() {
        let (mut stocks, sid) = setup(3);
        let err = Sale::create(&new_sale(ClientId::new(), sid, 4, 100), &mut stocks, Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn status_follows_payments() {
        let (mut stocks, sid) = setup(10);
        let (mut sale, _) =
            Sale::create(&new_sale(ClientId::new(), sid, 2, 1_000), &mut stocks, Utc::now())
                .unwrap();
        sale.record_payment(Money::from_cents(500), true).unwrap();
        assert_eq!(sale.status(), SettlementStatus::Partial);
        assert_eq!(sale.credit_applied(), Money::from_cents(500));
        sale.record_payment(Money::from_cents(1_500), false).unwrap();
        assert_eq!(sale.status(), SettlementStatus::Paid);
        assert!(sale.record_payment(Money::from_cents(1), false).is_err());

        sale.release_payment(Money::from_cents(500), true).unwrap();
        assert_eq!(sale.status(), SettlementStatus::Partial);
        assert_eq!(sale.credit_applied(), Money::ZERO);
    }

    #[test]
    fn cancel_restores_stock_once() {
        let (mut stocks, sid) = setup(10);
        let (mut sale, _) =
            Sale::create(&new_sale(ClientId::new(), sid, 2, 1_000), &mut stocks, Utc::now())
                .unwrap();
        let movements = sale.cancel(&mut stocks, Utc::now()).unwrap();
        assert_eq!(movements[0].kind, MovementKind::SaleReversal);
        assert_eq!(stocks[&sid].quantity(), 10);
        assert_eq!(sale.status(), SettlementStatus::Cancelled);
        assert_eq!(sale.outstanding(), Money::ZERO);
        assert!(matches!(
            sale.cancel(&mut stocks, Utc::now()),
            Err(DomainError::Conflict(_))
        ));
    }

    #[test]
    fn cancel_requires_released_payments() {
        let (mut stocks, sid) = setup(10);
        let (mut sale, _) =
            Sale::create(&new_sale(ClientId::new(), sid, 1, 1_000), &mut stocks, Utc::now())
                .unwrap();
        sale.record_payment(Money::from_cents(100), false).unwrap();
        assert!(sale.cancel(&mut stocks, Utc::now()).is_err());
    }

    #[test]
    fn a_sale_is_invoiced_once() {
        let (mut stocks, sid) = setup(10);
        let (mut sale, _) =
            Sale::create(&new_sale(ClientId::new(), sid, 1, 1_000), &mut stocks, Utc::now())
                .unwrap();
        let first = AggregateId::new();
        sale.link_invoice(first).unwrap();
        assert!(sale.link_invoice(AggregateId::new()).is_err());
        assert_eq!(sale.unlink_invoice(), Some(first));
    }
}
