use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use pelleterp_core::{DomainError, SettlementStatus};
use pelleterp_invoicing::{Counterparty, InvoiceId};
use pelleterp_parties::ClientId;
use pelleterp_sales::{NewSale, Sale, SaleId, SalePatch, likely_duplicate_of};
use pelleterp_treasury::{AllocationTarget, NewPayment, OpenItem, PaymentDirection, PaymentMethod};

use super::{ServiceResult, Services, Work, committed, within};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SaleQuery {
    pub client_id: Option<ClientId>,
    pub status: Option<SettlementStatus>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl Work {
    /// Put the sale's stock back, release its payments and cancel its
    /// invoice. The sale must be loaded.
    pub(crate) async fn reverse_sale(&mut self, id: SaleId) -> ServiceResult<()> {
        self.release_allocations(AllocationTarget::Sale(id)).await?;

        let (stock_ids, invoice_id) = match self.sales.get(&id) {
            Some(sale) => (
                sale.lines().iter().map(|l| l.stock_id).collect::<Vec<_>>(),
                sale.invoice_id(),
            ),
            None => return Err(DomainError::not_found(format!("sale {id}")).into()),
        };
        for stock_id in stock_ids {
            if !self.stocks.load(&self.store, stock_id).await? {
                warn!(sale_id = %id, stock_id = %stock_id, "stock no longer exists; quantity not restored");
            }
        }
        let now = self.now;
        let movements = self
            .sales
            .expect_mut(&id, "sale")?
            .cancel(self.stocks.map_mut(), now)?;
        self.record_all(&movements)?;

        if let Some(invoice_id) = invoice_id.map(InvoiceId) {
            if self.invoices.load(&self.store, invoice_id).await? {
                let invoice = self.invoices.expect_mut(&invoice_id, "invoice")?;
                if !invoice.is_cancelled() {
                    let reversed = invoice.cancel(self.supplies.map_mut(), now)?;
                    self.record_all(&reversed)?;
                }
            }
        }
        Ok(())
    }

    /// Reverse (unless already cancelled) and drop the sale. Its stock
    /// movements stay as audit trail.
    pub(crate) async fn remove_sale(&mut self, id: SaleId) -> ServiceResult<()> {
        self.sales.require(&self.store, id, "sale").await?;
        let cancelled = self.sales.get(&id).is_some_and(|s| s.is_cancelled());
        if !cancelled {
            self.reverse_sale(id).await?;
        }
        let invoice_id = self.sales.get(&id).and_then(|s| s.invoice_id()).map(InvoiceId);
        if let Some(invoice_id) = invoice_id {
            if self.invoices.load(&self.store, invoice_id).await? {
                self.invoices.expect_mut(&invoice_id, "invoice")?.unlink_sale();
            }
        }
        self.sales.remove(&id);
        Ok(())
    }
}

impl Services {
    /// Create a sale: stock goes out, and with `apply_credit` the client's
    /// credit pays as much of it as it covers.
    #[instrument(skip_all, fields(client_id = %input.client_id), err)]
    pub async fn create_sale(&self, input: NewSale) -> ServiceResult<Sale> {
        let mut work = self.work();
        work.clients.require(&work.store, input.client_id, "client").await?;
        let client = work
            .clients
            .get(&input.client_id)
            .ok_or_else(|| DomainError::not_found(format!("client {}", input.client_id)))?;
        if !client.can_transact() {
            return Err(DomainError::validation(format!("client '{}' is inactive", client.name)).into());
        }
        let credit = client.credit_balance();

        for line in &input.lines {
            work.stocks.require(&work.store, line.stock_id, "stock").await?;
        }
        let (sale, movements) = Sale::create(&input, work.stocks.map_mut(), work.now)?;

        if !input.allow_duplicate {
            let existing = work.store.list::<Sale>().await?;
            if let Some(original) =
                likely_duplicate_of(&sale, existing.iter(), self.settings().duplicate_window)
            {
                return Err(DomainError::conflict(format!(
                    "looks like a duplicate of sale {original}; set allow_duplicate to record it anyway"
                ))
                .into());
            }
        }

        let sale_id = sale.id;
        let total = sale.total();
        work.sales.insert(sale_id, sale);
        work.record_all(&movements)?;

        if input.apply_credit && credit.is_positive() {
            let amount = credit.min(total);
            let item = OpenItem {
                target: AllocationTarget::Sale(sale_id),
                outstanding: total,
            };
            work.record_payment(
                NewPayment {
                    direction: PaymentDirection::Incoming,
                    counterparty: Counterparty::Client(input.client_id),
                    date: input.date,
                    amount,
                    method: PaymentMethod::CreditBalance,
                    check_id: None,
                    notes: Some("credit applied to sale".to_string()),
                },
                &[item],
            )
            .await?;
        }

        let sale = work.sales.get(&sale_id).cloned();
        work.commit().await?;
        let sale = sale.ok_or_else(|| DomainError::not_found(format!("sale {sale_id}")))?;
        info!(sale_id = %sale_id, total = %sale.total(), paid = %sale.amount_paid(), "sale created");
        Ok(committed(sale))
    }

    pub async fn get_sale(&self, id: SaleId) -> ServiceResult<Sale> {
        self.require(id, "sale").await
    }

    /// Sales matching the query, most recent first.
    pub async fn list_sales(&self, query: &SaleQuery) -> ServiceResult<Vec<Sale>> {
        let mut sales: Vec<Sale> = self
            .store()
            .list::<Sale>()
            .await?
            .into_iter()
            .filter(|s| query.client_id.is_none_or(|c| s.client_id == c))
            .filter(|s| query.status.is_none_or(|st| s.status() == st))
            .filter(|s| within(s.date, query.from, query.to))
            .collect();
        sales.sort_by(|a, b| b.date.cmp(&a.date).then(b.created_at.cmp(&a.created_at)));
        Ok(sales)
    }

    #[instrument(skip(self, patch), fields(sale_id = %id), err)]
    pub async fn update_sale(&self, id: SaleId, patch: SalePatch) -> ServiceResult<Sale> {
        let mut sale: Sale = self.require(id, "sale").await?;
        sale.apply_patch(patch, self.now());
        self.commit_one(sale).await
    }

    /// Cancel a sale: restores stock, releases its payments to client credit
    /// and cancels its invoice.
    #[instrument(skip(self), fields(sale_id = %id), err)]
    pub async fn cancel_sale(&self, id: SaleId) -> ServiceResult<Sale> {
        let mut work = self.work();
        work.sales.require(&work.store, id, "sale").await?;
        work.reverse_sale(id).await?;
        let sale = work.sales.get(&id).cloned();
        work.commit().await?;
        let sale = sale.ok_or_else(|| DomainError::not_found(format!("sale {id}")))?;
        info!(sale_id = %id, "sale cancelled");
        Ok(committed(sale))
    }

    #[instrument(skip(self), fields(sale_id = %id), err)]
    pub async fn delete_sale(&self, id: SaleId) -> ServiceResult<()> {
        let mut work = self.work();
        work.remove_sale(id).await?;
        work.commit().await?;
        info!(sale_id = %id, "sale deleted");
        Ok(())
    }
}
