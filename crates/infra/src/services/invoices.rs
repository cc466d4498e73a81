use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use pelleterp_core::{DomainError, SettlementStatus};
use pelleterp_invoicing::{
    Counterparty, Invoice, InvoiceId, InvoiceKind, InvoiceLetter, InvoiceNumber, NewPurchaseInvoice,
    NewSaleInvoice,
};
use pelleterp_treasury::{AllocationTarget, Payment, PaymentDirection};

use super::unique::UniqueKey;
use super::{ServiceResult, Services, committed, within};

fn invoice_key(invoice: &Invoice) -> String {
    match invoice.counterparty() {
        Counterparty::Supplier(supplier) if invoice.kind() == InvoiceKind::Purchase => {
            UniqueKey::purchase_invoice(supplier, invoice.letter(), invoice.number())
        }
        _ => UniqueKey::sale_invoice(invoice.letter(), invoice.number()),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceQuery {
    pub kind: Option<InvoiceKind>,
    pub counterparty_id: Option<uuid::Uuid>,
    pub status: Option<SettlementStatus>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl Services {
    /// Issue a sale invoice with the next number of its letter at the
    /// configured point of sale. With a sale, its lines and paid amount are
    /// copied and the two are linked.
    #[instrument(skip_all, fields(client_id = %input.client_id), err)]
    pub async fn create_sale_invoice(&self, input: NewSaleInvoice) -> ServiceResult<Invoice> {
        let mut work = self.work();
        work.clients.require(&work.store, input.client_id, "client").await?;
        let client = work
            .clients
            .get(&input.client_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("client {}", input.client_id)))?;
        if !client.can_transact() {
            return Err(DomainError::validation(format!("client '{}' is inactive", client.name)).into());
        }
        if let Some(sale_id) = input.sale_id {
            work.sales.require(&work.store, sale_id, "sale").await?;
        }

        let letter = InvoiceLetter::for_client(client.tax_condition);
        let used: Vec<InvoiceNumber> = work
            .store
            .list::<Invoice>()
            .await?
            .iter()
            .filter(|i| i.kind() == InvoiceKind::Sale && i.letter() == letter)
            .map(|i| i.number())
            .collect();
        let number = InvoiceNumber::next(self.settings().point_of_sale, used)?;

        let sale_id = input.sale_id;
        let sale = sale_id.and_then(|id| work.sales.get(&id));
        let invoice = Invoice::for_sale(input, &client, sale, number, work.now)?;
        if let Some(sale_id) = sale_id {
            work.sales
                .expect_mut(&sale_id, "sale")?
                .link_invoice(invoice.id.0)?;
        }
        let id = invoice.id;
        work.claim_key(UniqueKey::sale_invoice(invoice.letter(), invoice.number()), id)?;
        work.invoices.insert(id, invoice.clone());
        work.commit().await?;
        info!(invoice_id = %id, number = %invoice.number(), total = %invoice.total(), "sale invoice issued");
        Ok(committed(invoice))
    }

    /// Register a supplier's invoice. Lines that reference a supply add the
    /// purchased quantity to it.
    #[instrument(skip_all, fields(supplier_id = %input.supplier_id, number = %input.number), err)]
    pub async fn create_purchase_invoice(&self, input: NewPurchaseInvoice) -> ServiceResult<Invoice> {
        let mut work = self.work();
        work.suppliers.require(&work.store, input.supplier_id, "supplier").await?;
        let supplier = work
            .suppliers
            .get(&input.supplier_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("supplier {}", input.supplier_id)))?;

        let party = Counterparty::Supplier(input.supplier_id);
        let letter = InvoiceLetter::for_supplier(supplier.tax_condition, input.letter);
        let taken = work.store.list::<Invoice>().await?.iter().any(|i| {
            i.kind() == InvoiceKind::Purchase
                && i.counterparty() == party
                && i.letter() == letter
                && i.number() == input.number
        });
        if taken {
            return Err(DomainError::conflict(format!(
                "invoice {letter:?} {} of this supplier is already registered",
                input.number
            ))
            .into());
        }

        for supply_id in input.lines.iter().filter_map(|l| l.supply_id) {
            work.supplies.require(&work.store, supply_id, "supply").await?;
        }
        let (invoice, movements) =
            Invoice::for_purchase(input, &supplier, work.supplies.map_mut(), work.now)?;
        work.record_all(&movements)?;
        let id = invoice.id;
        work.claim_key(UniqueKey::purchase_invoice(supplier.id, invoice.letter(), invoice.number()), id)?;
        work.invoices.insert(id, invoice.clone());
        work.commit().await?;
        info!(
            invoice_id = %id,
            total = %invoice.total(),
            supply_movements = movements.len(),
            "purchase invoice registered"
        );
        Ok(committed(invoice))
    }

    pub async fn get_invoice(&self, id: InvoiceId) -> ServiceResult<Invoice> {
        self.require(id, "invoice").await
    }

    /// Invoices matching the query, most recent first.
    pub async fn list_invoices(&self, query: &InvoiceQuery) -> ServiceResult<Vec<Invoice>> {
        let mut invoices: Vec<Invoice> = self
            .store()
            .list::<Invoice>()
            .await?
            .into_iter()
            .filter(|i| query.kind.is_none_or(|k| i.kind() == k))
            .filter(|i| query.status.is_none_or(|s| i.status() == s))
            .filter(|i| {
                query
                    .counterparty_id
                    .is_none_or(|c| *i.counterparty().aggregate_id().as_uuid() == c)
            })
            .filter(|i| within(i.issue_date, query.from, query.to))
            .collect();
        invoices.sort_by(|a, b| {
            b.issue_date
                .cmp(&a.issue_date)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(invoices)
    }

    /// Cancel an invoice. Purchases give their supplies back; a sale invoice
    /// is unlinked from its sale.
    #[instrument(skip(self), fields(invoice_id = %id), err)]
    pub async fn cancel_invoice(&self, id: InvoiceId) -> ServiceResult<Invoice> {
        let mut work = self.work();
        work.invoices.require(&work.store, id, "invoice").await?;
        let (supply_ids, sale_id) = match work.invoices.get(&id) {
            Some(invoice) => (
                invoice.lines().iter().filter_map(|l| l.supply_id).collect::<Vec<_>>(),
                invoice.sale_id(),
            ),
            None => return Err(DomainError::not_found(format!("invoice {id}")).into()),
        };
        for supply_id in supply_ids {
            if !work.supplies.load(&work.store, supply_id).await? {
                warn!(invoice_id = %id, supply_id = %supply_id, "supply no longer exists; purchase not reversed");
            }
        }

        let now = work.now;
        let invoice = work.invoices.expect_mut(&id, "invoice")?;
        let movements = invoice.cancel(work.supplies.map_mut(), now)?;
        invoice.unlink_sale();
        work.record_all(&movements)?;

        if let Some(sale_id) = sale_id {
            if work.sales.load(&work.store, sale_id).await? {
                work.sales.expect_mut(&sale_id, "sale")?.unlink_invoice();
            }
        }

        let invoice = work.invoices.get(&id).cloned();
        work.commit().await?;
        let invoice = invoice.ok_or_else(|| DomainError::not_found(format!("invoice {id}")))?;
        info!(invoice_id = %id, "invoice cancelled");
        Ok(committed(invoice))
    }

    /// Delete an invoice. Rejected while outgoing payments are allocated to
    /// it; incoming allocations are released to the client's credit.
    #[instrument(skip(self), fields(invoice_id = %id), err)]
    pub async fn delete_invoice(&self, id: InvoiceId) -> ServiceResult<()> {
        let mut work = self.work();
        work.invoices.require(&work.store, id, "invoice").await?;
        let target = AllocationTarget::Invoice(id);

        let paid_out = work.store.list::<Payment>().await?.iter().any(|p| {
            p.is_active()
                && p.direction() == PaymentDirection::Outgoing
                && p.allocated_to(target).is_positive()
        });
        if paid_out {
            return Err(DomainError::conflict(
                "invoice has supplier payments allocated; delete them first",
            )
            .into());
        }
        work.release_allocations(target).await?;

        let Some(invoice) = work.invoices.get(&id).cloned() else {
            return Err(DomainError::not_found(format!("invoice {id}")).into());
        };
        for supply_id in invoice.lines().iter().filter_map(|l| l.supply_id) {
            work.supplies.load(&work.store, supply_id).await?;
        }
        let movements = invoice.reverse_purchases(work.supplies.map_mut(), work.now)?;
        work.record_all(&movements)?;

        if let Some(sale_id) = invoice.sale_id() {
            if work.sales.load(&work.store, sale_id).await? {
                work.sales.expect_mut(&sale_id, "sale")?.unlink_invoice();
            }
        }
        work.release_key(invoice_key(&invoice), id);
        work.invoices.remove(&id);
        work.commit().await?;
        info!(invoice_id = %id, reversed = movements.len(), "invoice deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pelleterp_core::Money;
    use pelleterp_invoicing::{LineInput, TaxRate};
    use pelleterp_inventory::MovementKind;
    use pelleterp_parties::{NewSupplier, TaxCondition};
    use pelleterp_sales::{NewSale, SaleLineInput};
    use pelleterp_treasury::PaymentMethod;

    use super::*;
    use crate::services::ServiceError;
    use crate::services::payments::PaymentRequest;
    use crate::services::testing::*;

    fn purchase(supplier: pelleterp_parties::SupplierId, seq: u64, lines: Vec<LineInput>) -> NewPurchaseInvoice {
        NewPurchaseInvoice {
            supplier_id: supplier,
            number: InvoiceNumber::new(2, seq).unwrap(),
            letter: None,
            issue_date: day(6),
            due_date: Some(day(30)),
            lines,
            notes: None,
        }
    }

    fn roll_line(supply: pelleterp_inventory::SupplyId, qty: i64) -> LineInput {
        LineInput {
            description: "Rollo de alfalfa".into(),
            quantity: qty,
            unit_price: cents(40_000),
            tax_rate: TaxRate::GENERAL,
            stock_id: None,
            supply_id: Some(supply),
        }
    }

    #[tokio::test]
    async fn sale_invoices_are_numbered_per_letter() {
        let svc = services();
        let c = client(&svc, "Forrajera del Sur").await;
        let stock = bags(&svc, 10).await;
        let invoice = |sale| NewSaleInvoice {
            client_id: c.id,
            sale_id: Some(sale),
            issue_date: day(9),
            due_date: None,
            lines: Vec::new(),
            notes: None,
        };

        let mut ids = Vec::new();
        for qty in [1, 2] {
            let sale = svc
                .create_sale(NewSale {
                    client_id: c.id,
                    date: day(9),
                    lines: vec![SaleLineInput {
                        stock_id: stock.id,
                        description: None,
                        quantity: qty,
                        unit_price: cents(100_000),
                    }],
                    notes: None,
                    apply_credit: false,
                    allow_duplicate: false,
                })
                .await
                .unwrap();
            let inv = svc.create_sale_invoice(invoice(sale.id)).await.unwrap();
            assert_eq!(inv.letter(), InvoiceLetter::A);
            ids.push((sale.id, inv));
        }
        assert_eq!(ids[0].1.number().to_string(), "0001-00000001");
        assert_eq!(ids[1].1.number().to_string(), "0001-00000002");
        assert_eq!(ids[1].1.total(), cents(242_000));

        let sale = svc.get_sale(ids[0].0).await.unwrap();
        assert_eq!(sale.invoice_id(), Some(ids[0].1.id.0));
        let err = svc.create_sale_invoice(invoice(ids[0].0)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Conflict(_))));
    }

    #[tokio::test]
    async fn purchase_invoice_adds_supplies_and_delete_reverses() {
        let svc = services();
        let s = supplier(&svc, "Alfalfas Pampeanas").await;
        let rolls = rolls(&svc, 3).await;

        let invoice = svc
            .create_purchase_invoice(purchase(s.id, 77, vec![roll_line(rolls.id, 10)]))
            .await
            .unwrap();
        let supply = svc.get_supply(rolls.id).await.unwrap();
        assert_eq!(supply.quantity(), 13);
        assert_eq!(supply.unit_cost, Some(cents(40_000)));

        let err = svc
            .create_purchase_invoice(purchase(s.id, 77, vec![roll_line(rolls.id, 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Conflict(_))));

        svc.delete_invoice(invoice.id).await.unwrap();
        assert_eq!(svc.get_supply(rolls.id).await.unwrap().quantity(), 3);
        let kinds: Vec<_> = svc
            .supply_movements(rolls.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![MovementKind::Opening, MovementKind::Purchase, MovementKind::PurchaseReversal]
        );
    }

    #[tokio::test]
    async fn supplier_payments_block_delete_and_cancel() {
        let svc = services();
        let s = svc
            .create_supplier(NewSupplier {
                name: "Bolsas SRL".into(),
                tax_condition: TaxCondition::Monotributo,
                ..Default::default()
            })
            .await
            .unwrap();
        let rolls = rolls(&svc, 0).await;
        let invoice = svc
            .create_purchase_invoice(purchase(s.id, 5, vec![roll_line(rolls.id, 2)]))
            .await
            .unwrap();
        assert_eq!(invoice.letter(), InvoiceLetter::C);
        assert_eq!(invoice.total(), cents(80_000));

        svc.create_payment(PaymentRequest {
            direction: PaymentDirection::Outgoing,
            counterparty: Counterparty::Supplier(s.id),
            date: day(10),
            amount: cents(30_000),
            method: PaymentMethod::Transfer,
            check: None,
            targets: vec![AllocationTarget::Invoice(invoice.id)],
            auto_allocate: false,
            notes: None,
        })
        .await
        .unwrap();

        let err = svc.delete_invoice(invoice.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Conflict(_))));
        let err = svc.cancel_invoice(invoice.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Conflict(_))));
        assert_eq!(svc.get_invoice(invoice.id).await.unwrap().status(), SettlementStatus::Partial);
    }

    #[tokio::test]
    async fn cancelling_a_sale_invoice_unlinks_the_sale() {
        let svc = services();
        let c = client(&svc, "Forrajera del Sur").await;
        let stock = bags(&svc, 10).await;
        let sale = svc
            .create_sale(NewSale {
                client_id: c.id,
                date: day(9),
                lines: vec![SaleLineInput {
                    stock_id: stock.id,
                    description: None,
                    quantity: 1,
                    unit_price: cents(100_000),
                }],
                notes: None,
                apply_credit: false,
                allow_duplicate: false,
            })
            .await
            .unwrap();
        let invoice = svc
            .create_sale_invoice(NewSaleInvoice {
                client_id: c.id,
                sale_id: Some(sale.id),
                issue_date: day(9),
                due_date: None,
                lines: Vec::new(),
                notes: None,
            })
            .await
            .unwrap();

        let cancelled = svc.cancel_invoice(invoice.id).await.unwrap();
        assert_eq!(cancelled.status(), SettlementStatus::Cancelled);
        assert_eq!(cancelled.sale_id(), None);
        assert_eq!(cancelled.outstanding(), Money::ZERO);
        assert_eq!(svc.get_sale(sale.id).await.unwrap().invoice_id(), None);
    }

    #[tokio::test]
    async fn deleting_a_paid_sale_invoice_turns_payments_into_client_credit() {
        let svc = services();
        let c = client(&svc, "Forrajera del Sur").await;
        let invoice = svc
            .create_sale_invoice(NewSaleInvoice {
                client_id: c.id,
                sale_id: None,
                issue_date: day(9),
                due_date: None,
                lines: vec![LineInput {
                    description: "Flete".into(),
                    quantity: 1,
                    unit_price: cents(100_000),
                    tax_rate: TaxRate::GENERAL,
                    stock_id: None,
                    supply_id: None,
                }],
                notes: None,
            })
            .await
            .unwrap();
        let receipt = svc
            .create_payment(PaymentRequest {
                direction: PaymentDirection::Incoming,
                counterparty: Counterparty::Client(c.id),
                date: day(10),
                amount: cents(50_000),
                method: PaymentMethod::Transfer,
                check: None,
                targets: vec![AllocationTarget::Invoice(invoice.id)],
                auto_allocate: false,
                notes: None,
            })
            .await
            .unwrap();
        assert_eq!(receipt.payment.excess(), Money::ZERO);
        assert_eq!(svc.get_invoice(invoice.id).await.unwrap().amount_paid(), cents(50_000));

        svc.delete_invoice(invoice.id).await.unwrap();

        let payment = svc.get_payment(receipt.payment.id).await.unwrap();
        assert!(payment.allocations().is_empty());
        assert_eq!(payment.excess(), cents(50_000));

        let client = svc.get_client(c.id).await.unwrap();
        assert_eq!(client.credit_balance(), cents(50_000));
        let last = client.credit_ledger().last().unwrap();
        assert_eq!(last.kind, pelleterp_parties::CreditEntryKind::PaymentExcess);
        assert_eq!(last.amount, cents(50_000));
        assert_eq!(last.payment_id, Some(payment.id.0));
    }

    #[tokio::test]
    async fn invoice_numbers_are_reserved_in_the_same_commit() {
        use crate::services::unique::UniqueKey;
        use crate::store::StoreError;

        let svc = services();
        let c = client(&svc, "Forrajera del Sur").await;
        let stock = bags(&svc, 10).await;
        let sale = svc
            .create_sale(NewSale {
                client_id: c.id,
                date: day(9),
                lines: vec![SaleLineInput {
                    stock_id: stock.id,
                    description: None,
                    quantity: 1,
                    unit_price: cents(100_000),
                }],
                notes: None,
                apply_credit: false,
                allow_duplicate: false,
            })
            .await
            .unwrap();

        // Another request already took 0001-00000001 but has not listed yet.
        let first = InvoiceNumber::new(1, 1).unwrap();
        let taken = UniqueKey::new(
            UniqueKey::sale_invoice(InvoiceLetter::A, first),
            pelleterp_core::AggregateId::new(),
        );
        svc.commit_one(taken).await.unwrap();

        let err = svc
            .create_sale_invoice(NewSaleInvoice {
                client_id: c.id,
                sale_id: Some(sale.id),
                issue_date: day(9),
                due_date: None,
                lines: Vec::new(),
                notes: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::Conflict(_))));
        assert!(svc.store().list::<Invoice>().await.unwrap().is_empty());
        assert_eq!(svc.get_sale(sale.id).await.unwrap().invoice_id(), None);
    }

    #[tokio::test]
    async fn deleted_purchase_invoice_frees_its_number() {
        let svc = services();
        let s = supplier(&svc, "Alfalfas Pampeanas").await;
        let rolls = rolls(&svc, 0).await;

        let invoice = svc
            .create_purchase_invoice(purchase(s.id, 12, vec![roll_line(rolls.id, 1)]))
            .await
            .unwrap();
        svc.delete_invoice(invoice.id).await.unwrap();

        let again = svc
            .create_purchase_invoice(purchase(s.id, 12, vec![roll_line(rolls.id, 2)]))
            .await
            .unwrap();
        assert_eq!(again.number(), invoice.number());
        assert_eq!(svc.get_supply(rolls.id).await.unwrap().quantity(), 2);

        // Same number from another supplier is a different invoice.
        let other = supplier(&svc, "Bolsas SRL").await;
        svc.create_purchase_invoice(purchase(other.id, 12, vec![roll_line(rolls.id, 1)]))
            .await
            .unwrap();
    }
}
