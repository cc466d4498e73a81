//! Repair and reconciliation operations.
//!
//! Every operation inspects the stored records, reports what is off and,
//! unless `dry_run` is set, writes all fixes in a single commit. Findings
//! without a fix are reported only.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use pelleterp_core::{AggregateId, Money};
use pelleterp_inventory::{SourceKind, Stock, StockMovement, SupplyId, SupplyMovement, SupplyStock};
use pelleterp_invoicing::Invoice;
use pelleterp_parties::Client;
use pelleterp_production::{PelletGeneration, Production, ProductionId, SupplyConsumption};
use pelleterp_sales::{DuplicateGroup, Sale, SaleId, find_duplicates};
use pelleterp_treasury::{AllocationTarget, Payment, PaymentMethod};

use super::unique::UniqueKey;
use super::{ServiceResult, Services, Work};

fn dry_run_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MaintenanceOptions {
    #[serde(default = "dry_run_by_default")]
    pub dry_run: bool,
}

impl Default for MaintenanceOptions {
    fn default() -> Self {
        Self { dry_run: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub subject: String,
    pub problem: String,
    /// What was (or would be) done; `None` when it needs a human.
    pub fix: Option<String>,
}

impl Finding {
    fn fixed(subject: impl Into<String>, problem: impl Into<String>, fix: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            problem: problem.into(),
            fix: Some(fix.into()),
        }
    }

    fn report(subject: impl Into<String>, problem: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            problem: problem.into(),
            fix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceReport {
    pub operation: &'static str,
    pub dry_run: bool,
    pub findings: Vec<Finding>,
    /// Whether fixes were written.
    pub applied: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateReport {
    pub dry_run: bool,
    pub groups: Vec<DuplicateGroup>,
    pub deleted: Vec<SaleId>,
}

impl Services {
    async fn finish(
        &self,
        work: Work,
        operation: &'static str,
        options: MaintenanceOptions,
        findings: Vec<Finding>,
    ) -> ServiceResult<MaintenanceReport> {
        let fixes = findings.iter().filter(|f| f.fix.is_some()).count();
        let applied = !options.dry_run && fixes > 0;
        if applied {
            work.commit().await?;
        }
        info!(
            operation,
            dry_run = options.dry_run,
            findings = findings.len(),
            fixes,
            applied,
            "maintenance finished"
        );
        Ok(MaintenanceReport {
            operation,
            dry_run: options.dry_run,
            findings,
            applied,
        })
    }

    /// Recompute paid amounts of sales and invoices from active payment
    /// allocations and client credit balances from their ledgers.
    #[instrument(skip(self), fields(dry_run = options.dry_run), err)]
    pub async fn reconcile_payments(&self, options: MaintenanceOptions) -> ServiceResult<MaintenanceReport> {
        let mut work = self.work();
        let payments = work.store.list::<Payment>().await?;
        let sales = work.store.list::<Sale>().await?;
        let invoices = work.store.list::<Invoice>().await?;
        let clients = work.store.list::<Client>().await?;

        let mut paid: BTreeMap<AllocationTarget, (Money, Money)> = BTreeMap::new();
        for p in payments.iter().filter(|p| p.is_active()) {
            let from_credit = p.method() == PaymentMethod::CreditBalance;
            for a in p.allocations() {
                let entry = paid.entry(a.target).or_default();
                entry.0 = entry.0.checked_add(a.amount)?;
                if from_credit {
                    entry.1 = entry.1.checked_add(a.amount)?;
                }
            }
        }

        let mut findings = Vec::new();
        let mut sale_paid = BTreeMap::new();
        for sale in sales {
            let (amount, credit) = paid.get(&AllocationTarget::Sale(sale.id)).copied().unwrap_or_default();
            let mut fixed = sale.clone();
            if fixed.resync_paid(amount, credit) {
                findings.push(Finding::fixed(
                    format!("sale {}", sale.id),
                    format!("amount paid {} disagrees with its allocations", sale.amount_paid()),
                    format!("set to {amount} ({:?})", fixed.status()),
                ));
                work.sales.insert(sale.id, fixed.clone());
            }
            sale_paid.insert(sale.id, fixed.amount_paid());
        }

        for invoice in invoices {
            let amount = match invoice.sale_id() {
                Some(sale_id) => match sale_paid.get(&sale_id) {
                    Some(amount) => *amount,
                    None => {
                        findings.push(Finding::report(
                            format!("invoice {}", invoice.number()),
                            format!("linked sale {sale_id} no longer exists; run cleanup-invoices"),
                        ));
                        continue;
                    }
                },
                None => paid
                    .get(&AllocationTarget::Invoice(invoice.id))
                    .map(|(amount, _)| *amount)
                    .unwrap_or_default(),
            };
            let mut fixed = invoice.clone();
            if fixed.resync_paid(amount) {
                findings.push(Finding::fixed(
                    format!("invoice {}", invoice.number()),
                    format!("amount paid {} disagrees with its payments", invoice.amount_paid()),
                    format!("set to {amount} ({:?})", fixed.status()),
                ));
                work.invoices.insert(invoice.id, fixed);
            }
        }

        let payment_ids: BTreeSet<AggregateId> = payments.iter().map(|p| p.id.0).collect();
        for client in clients {
            let mut fixed = client.clone();
            let dropped = fixed.drop_entries_for_missing_payments(|p| payment_ids.contains(&p))?;
            for entry in &dropped {
                findings.push(Finding::fixed(
                    format!("client '{}'", client.name),
                    format!(
                        "credit entry of {} refers to missing payment {}",
                        entry.amount,
                        entry.payment_id.map(|p| p.to_string()).unwrap_or_default()
                    ),
                    "entry removed",
                ));
            }
            if let Some(previous) = fixed.resync_balance()? {
                findings.push(Finding::fixed(
                    format!("client '{}'", client.name),
                    format!("credit balance {previous} disagrees with the ledger"),
                    format!("set to {}", fixed.credit_balance()),
                ));
            }
            if fixed != client {
                work.clients.insert(client.id, fixed);
            }
        }

        self.finish(work, "reconcile-payments", options, findings).await
    }

    /// Drop production records whose batch is gone and recompute batch
    /// totals from the records that remain.
    #[instrument(skip(self), fields(dry_run = options.dry_run), err)]
    pub async fn repair_production(&self, options: MaintenanceOptions) -> ServiceResult<MaintenanceReport> {
        let mut work = self.work();
        let productions = work.store.list::<Production>().await?;
        let consumptions = work.store.list::<SupplyConsumption>().await?;
        let generations = work.store.list::<PelletGeneration>().await?;
        let live: BTreeSet<ProductionId> = productions.iter().map(|p| p.id).collect();

        let mut findings = Vec::new();
        for c in consumptions.iter().filter(|c| !live.contains(&c.production_id)) {
            findings.push(Finding::fixed(
                format!("supply consumption {}", c.id),
                format!("production {} no longer exists", c.production_id),
                "record deleted",
            ));
            work.changes.delete(c);
        }
        for g in generations.iter().filter(|g| !live.contains(&g.production_id)) {
            findings.push(Finding::fixed(
                format!("pellet generation {}", g.id),
                format!("production {} no longer exists", g.production_id),
                "record deleted",
            ));
            work.changes.delete(g);
        }

        let live_ids: BTreeSet<AggregateId> = live.iter().map(|id| id.0).collect();
        for key in work.store.list::<UniqueKey>().await? {
            if key.is_batch_key() && !live_ids.contains(&key.owner) {
                findings.push(Finding::fixed(
                    key.key.clone(),
                    format!("reserved by missing production {}", key.owner),
                    "key freed",
                ));
                work.changes.delete(&key);
            }
        }

        for production in productions {
            let mut fixed = production.clone();
            if fixed.recompute(&consumptions, &generations) {
                findings.push(Finding::fixed(
                    format!("production {}", production.batch_code),
                    format!(
                        "totals {}/{} or record lists disagree with its records",
                        production.total_consumed, production.total_generated
                    ),
                    format!("recomputed to {}/{}", fixed.total_consumed, fixed.total_generated),
                ));
                work.record(&fixed)?;
            }
        }

        self.finish(work, "repair-production", options, findings).await
    }

    /// Reset every stock and supply quantity to the sum of its movements.
    #[instrument(skip(self), fields(dry_run = options.dry_run), err)]
    pub async fn rebuild_stock(&self, options: MaintenanceOptions) -> ServiceResult<MaintenanceReport> {
        let mut work = self.work();
        let mut findings = Vec::new();

        let movements = work.store.list::<StockMovement>().await?;
        for stock in work.store.list::<Stock>().await? {
            let total: i64 = movements.iter().filter(|m| m.stock_id == stock.id).map(|m| m.delta).sum();
            if total == stock.quantity() {
                continue;
            }
            let subject = format!("stock '{}'", stock.name);
            let problem = format!("quantity {} but movements add up to {total}", stock.quantity());
            if total < 0 {
                findings.push(Finding::report(subject, problem));
                continue;
            }
            let mut fixed = stock.clone();
            fixed.rebuild_from(&movements)?;
            findings.push(Finding::fixed(subject, problem, format!("set to {total}")));
            work.stocks.insert(stock.id, fixed);
        }

        let movements = work.store.list::<SupplyMovement>().await?;
        for supply in work.store.list::<SupplyStock>().await? {
            let total: i64 = movements.iter().filter(|m| m.supply_id == supply.id).map(|m| m.delta).sum();
            if total == supply.quantity() {
                continue;
            }
            let subject = format!("supply '{}'", supply.name);
            let problem = format!("quantity {} but movements add up to {total}", supply.quantity());
            if total < 0 {
                findings.push(Finding::report(subject, problem));
                continue;
            }
            let mut fixed = supply.clone();
            fixed.rebuild_from(&movements)?;
            findings.push(Finding::fixed(subject, problem, format!("set to {total}")));
            work.supplies.insert(supply.id, fixed);
        }

        self.finish(work, "rebuild-stock", options, findings).await
    }

    /// Remove what still points at deleted invoices or sales: payment
    /// allocations, purchase movements and sale/invoice links.
    #[instrument(skip(self), fields(dry_run = options.dry_run), err)]
    pub async fn cleanup_invoices(&self, options: MaintenanceOptions) -> ServiceResult<MaintenanceReport> {
        let mut work = self.work();
        let invoices = work.store.list::<Invoice>().await?;
        let sales = work.store.list::<Sale>().await?;
        let invoice_ids: BTreeSet<AggregateId> = invoices.iter().map(|i| i.id.0).collect();
        let sale_ids: BTreeSet<SaleId> = sales.iter().map(|s| s.id).collect();
        let mut findings = Vec::new();

        let missing: BTreeSet<AllocationTarget> = work
            .store
            .list::<Payment>()
            .await?
            .iter()
            .filter(|p| p.is_active())
            .flat_map(|p| p.allocations().iter().map(|a| a.target))
            .filter(|t| match t {
                AllocationTarget::Invoice(id) => !invoice_ids.contains(&id.0),
                AllocationTarget::Sale(id) => !sale_ids.contains(id),
            })
            .collect();
        for target in missing {
            let released = work.release_allocations(target).await?;
            findings.push(Finding::fixed(
                target.to_string(),
                "no longer exists but payments are allocated to it",
                format!("{released} released"),
            ));
        }

        let mut orphaned: BTreeMap<(AggregateId, SupplyId), Vec<SupplyMovement>> = BTreeMap::new();
        for m in work.store.list::<SupplyMovement>().await? {
            if m.source.kind != SourceKind::Invoice {
                continue;
            }
            if let Some(invoice) = m.source.id.filter(|id| !invoice_ids.contains(id)) {
                orphaned.entry((invoice, m.supply_id)).or_default().push(m);
            }
        }
        for ((invoice, supply_id), mut group) in orphaned {
            let net: i64 = group.iter().map(|m| m.delta).sum();
            if net == 0 {
                continue;
            }
            if !work.supplies.load(&work.store, supply_id).await? {
                warn!(%supply_id, "orphaned purchase movements of a missing supply left alone");
                continue;
            }
            let Some(supply) = work.supplies.get(&supply_id) else {
                continue;
            };
            let subject = format!("supply '{}'", supply.name);
            let problem = format!("{net} units come from missing invoice {invoice}");
            if supply.quantity() - net < 0 {
                findings.push(Finding::report(subject, format!("{problem}; reverting would go negative")));
                continue;
            }
            // Additions back first so the quantity never dips below zero.
            group.sort_by_key(|m| m.delta);
            let now = work.now;
            let supply = work.supplies.expect_mut(&supply_id, "supply")?;
            for m in &group {
                supply.revert_movement(m, now)?;
            }
            for m in &group {
                work.changes.delete(m);
            }
            findings.push(Finding::fixed(
                subject,
                problem,
                format!("{} movements removed and reverted", group.len()),
            ));
        }

        for key in work.store.list::<UniqueKey>().await? {
            if key.is_invoice_key() && !invoice_ids.contains(&key.owner) {
                findings.push(Finding::fixed(
                    key.key.clone(),
                    format!("reserved by missing invoice {}", key.owner),
                    "key freed",
                ));
                work.changes.delete(&key);
            }
        }

        for sale in &sales {
            if let Some(invoice) = sale.invoice_id().filter(|id| !invoice_ids.contains(id)) {
                work.sales.require(&work.store, sale.id, "sale").await?;
                work.sales.expect_mut(&sale.id, "sale")?.unlink_invoice();
                findings.push(Finding::fixed(
                    format!("sale {}", sale.id),
                    format!("linked invoice {invoice} no longer exists"),
                    "link cleared",
                ));
            }
        }
        for invoice in &invoices {
            if let Some(sale) = invoice.sale_id().filter(|id| !sale_ids.contains(id)) {
                work.invoices.require(&work.store, invoice.id, "invoice").await?;
                work.invoices.expect_mut(&invoice.id, "invoice")?.unlink_sale();
                findings.push(Finding::fixed(
                    format!("invoice {}", invoice.number()),
                    format!("linked sale {sale} no longer exists"),
                    "link cleared",
                ));
            }
        }

        self.finish(work, "cleanup-invoices", options, findings).await
    }

    /// Find sales recorded twice within the duplicate window; unless
    /// `dry_run`, delete every duplicate but the earliest of each group.
    #[instrument(skip(self), fields(dry_run = options.dry_run), err)]
    pub async fn duplicate_sales(&self, options: MaintenanceOptions) -> ServiceResult<DuplicateReport> {
        let sales = self.store().list::<Sale>().await?;
        let groups = find_duplicates(&sales, self.settings().duplicate_window);
        let mut deleted = Vec::new();
        if !options.dry_run && !groups.is_empty() {
            let mut work = self.work();
            for id in groups.iter().flat_map(|g| g.duplicates.iter().copied()) {
                work.remove_sale(id).await?;
                deleted.push(id);
            }
            work.commit().await?;
        }
        info!(groups = groups.len(), deleted = deleted.len(), "duplicate sales checked");
        Ok(DuplicateReport {
            dry_run: options.dry_run,
            groups,
            deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pelleterp_core::SettlementStatus;
    use pelleterp_inventory::{MovementKind, MovementSource};
    use pelleterp_invoicing::{InvoiceNumber, LineInput, NewPurchaseInvoice, TaxRate};
    use pelleterp_sales::{NewSale, SaleLineInput};

    use super::*;
    use crate::Changeset;
    use crate::services::testing::*;

    const APPLY: MaintenanceOptions = MaintenanceOptions { dry_run: false };

    async fn overwrite<D: pelleterp_core::Document>(svc: &Services, doc: &D) {
        let mut changes = Changeset::new();
        changes.put(doc).unwrap();
        svc.store().commit(changes).await.unwrap();
    }

    fn sale_input(client: pelleterp_parties::ClientId, stock: pelleterp_inventory::StockId) -> NewSale {
        NewSale {
            client_id: client,
            date: day(12),
            lines: vec![SaleLineInput {
                stock_id: stock,
                description: None,
                quantity: 2,
                unit_price: cents(10_000),
            }],
            notes: None,
            apply_credit: false,
            allow_duplicate: true,
        }
    }

    #[tokio::test]
    async fn rebuild_stock_reports_then_fixes_drift() {
        let svc = services();
        let stock = bags(&svc, 10).await;
        let mut drifted = svc.get_stock(stock.id).await.unwrap();
        drifted
            .apply(5, MovementKind::Adjustment, MovementSource::manual(), None, Utc::now())
            .unwrap();
        overwrite(&svc, &drifted).await;

        let report = svc.rebuild_stock(MaintenanceOptions::default()).await.unwrap();
        assert!(report.dry_run);
        assert!(!report.applied);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(svc.get_stock(stock.id).await.unwrap().quantity(), 15);

        let report = svc.rebuild_stock(APPLY).await.unwrap();
        assert!(report.applied);
        assert_eq!(svc.get_stock(stock.id).await.unwrap().quantity(), 10);
        assert!(svc.rebuild_stock(APPLY).await.unwrap().findings.is_empty());
    }

    #[tokio::test]
    async fn reconcile_restores_paid_amounts_and_credit() {
        let svc = services();
        let c = client(&svc, "Forrajera del Sur").await;
        let stock = bags(&svc, 10).await;
        let sale = svc.create_sale(sale_input(c.id, stock.id)).await.unwrap();

        let mut wrong = svc.get_sale(sale.id).await.unwrap();
        wrong.record_payment(cents(5_000), false).unwrap();
        overwrite(&svc, &wrong).await;
        svc.adjust_credit(
            c.id,
            crate::services::clients::CreditAdjustment {
                amount: cents(700),
                note: None,
            },
        )
        .await
        .unwrap();

        let report = svc.reconcile_payments(APPLY).await.unwrap();
        assert_eq!(report.findings.len(), 1);
        let sale = svc.get_sale(sale.id).await.unwrap();
        assert_eq!(sale.amount_paid(), Money::ZERO);
        assert_eq!(sale.status(), SettlementStatus::Pending);
        assert_eq!(svc.get_client(c.id).await.unwrap().credit_balance(), cents(700));
    }

    #[tokio::test]
    async fn cleanup_reverts_purchases_of_vanished_invoices() {
        let svc = services();
        let s = supplier(&svc, "Alfalfas Pampeanas").await;
        let rolls = rolls(&svc, 1).await;
        let invoice = svc
            .create_purchase_invoice(NewPurchaseInvoice {
                supplier_id: s.id,
                number: InvoiceNumber::new(1, 9).unwrap(),
                letter: None,
                issue_date: day(4),
                due_date: None,
                lines: vec![LineInput {
                    description: "Rollos".into(),
                    quantity: 6,
                    unit_price: cents(30_000),
                    tax_rate: TaxRate::GENERAL,
                    stock_id: None,
                    supply_id: Some(rolls.id),
                }],
                notes: None,
            })
            .await
            .unwrap();
        let mut gone = Changeset::new();
        gone.delete(&invoice);
        svc.store().commit(gone).await.unwrap();

        // The supply quantity and the invoice number key.
        let dry = svc.cleanup_invoices(MaintenanceOptions::default()).await.unwrap();
        assert_eq!(dry.findings.len(), 2);
        assert_eq!(svc.get_supply(rolls.id).await.unwrap().quantity(), 7);

        svc.cleanup_invoices(APPLY).await.unwrap();
        assert_eq!(svc.get_supply(rolls.id).await.unwrap().quantity(), 1);
        let kinds: Vec<_> = svc
            .supply_movements(rolls.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.kind)
            .collect();
        assert_eq!(kinds, vec![MovementKind::Opening]);
        assert!(svc.rebuild_stock(APPLY).await.unwrap().findings.is_empty());

        // The freed number can be registered again.
        svc.create_purchase_invoice(NewPurchaseInvoice {
            supplier_id: s.id,
            number: InvoiceNumber::new(1, 9).unwrap(),
            letter: None,
            issue_date: day(5),
            due_date: None,
            lines: vec![LineInput {
                description: "Flete".into(),
                quantity: 1,
                unit_price: cents(5_000),
                tax_rate: TaxRate::GENERAL,
                stock_id: None,
                supply_id: None,
            }],
            notes: None,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn cleanup_releases_payments_and_links_of_vanished_records() {
        use pelleterp_invoicing::{Counterparty, NewSaleInvoice};
        use pelleterp_treasury::PaymentDirection;

        use crate::services::payments::PaymentRequest;

        let svc = services();
        let c = client(&svc, "Forrajera del Sur").await;
        let stock = bags(&svc, 10).await;
        let invoice_for = |sale: Option<SaleId>| NewSaleInvoice {
            client_id: c.id,
            sale_id: sale,
            issue_date: day(12),
            due_date: None,
            lines: match sale {
                Some(_) => Vec::new(),
                None => vec![LineInput {
                    description: "Flete".into(),
                    quantity: 1,
                    unit_price: cents(50_000),
                    tax_rate: TaxRate::GENERAL,
                    stock_id: None,
                    supply_id: None,
                }],
            },
            notes: None,
        };
        let pay = |target: AllocationTarget, amount: i64| PaymentRequest {
            direction: PaymentDirection::Incoming,
            counterparty: Counterparty::Client(c.id),
            date: day(13),
            amount: cents(amount),
            method: PaymentMethod::Transfer,
            check: None,
            targets: vec![target],
            auto_allocate: false,
            notes: None,
        };

        let paid_sale = svc.create_sale(sale_input(c.id, stock.id)).await.unwrap();
        let kept_invoice = svc.create_sale_invoice(invoice_for(Some(paid_sale.id))).await.unwrap();
        let sale_payment = svc
            .create_payment(pay(AllocationTarget::Sale(paid_sale.id), 20_000))
            .await
            .unwrap();
        let loose_invoice = svc.create_sale_invoice(invoice_for(None)).await.unwrap();
        let invoice_payment = svc
            .create_payment(pay(AllocationTarget::Invoice(loose_invoice.id), 10_000))
            .await
            .unwrap();
        let kept_sale = svc.create_sale(sale_input(c.id, stock.id)).await.unwrap();
        let lost_invoice = svc.create_sale_invoice(invoice_for(Some(kept_sale.id))).await.unwrap();

        let mut gone = Changeset::new();
        gone.delete(&svc.get_sale(paid_sale.id).await.unwrap());
        gone.delete(&svc.get_invoice(loose_invoice.id).await.unwrap());
        gone.delete(&svc.get_invoice(lost_invoice.id).await.unwrap());
        svc.store().commit(gone).await.unwrap();

        // Two allocations, two links and the keys of the two vanished invoices.
        let dry = svc.cleanup_invoices(MaintenanceOptions::default()).await.unwrap();
        assert_eq!(dry.findings.len(), 6);
        assert_eq!(svc.get_client(c.id).await.unwrap().credit_balance(), Money::ZERO);

        let report = svc.cleanup_invoices(APPLY).await.unwrap();
        assert!(report.applied);
        for id in [sale_payment.payment.id, invoice_payment.payment.id] {
            let payment = svc.get_payment(id).await.unwrap();
            assert!(payment.allocations().is_empty());
            assert_eq!(payment.excess(), payment.amount());
        }
        let client = svc.get_client(c.id).await.unwrap();
        assert_eq!(client.credit_balance(), cents(30_000));
        assert!(
            client.credit_ledger().iter().rev().take(2)
                .all(|e| e.kind == pelleterp_parties::CreditEntryKind::PaymentExcess)
        );
        assert_eq!(svc.get_invoice(kept_invoice.id).await.unwrap().sale_id(), None);
        assert_eq!(svc.get_sale(kept_sale.id).await.unwrap().invoice_id(), None);
        assert!(svc.cleanup_invoices(APPLY).await.unwrap().findings.is_empty());
    }

    #[tokio::test]
    async fn duplicate_sales_keeps_the_earliest() {
        let svc = services();
        let c = client(&svc, "Forrajera del Sur").await;
        let stock = bags(&svc, 10).await;
        let first = svc.create_sale(sale_input(c.id, stock.id)).await.unwrap();
        let second = svc.create_sale(sale_input(c.id, stock.id)).await.unwrap();
        assert_eq!(svc.get_stock(stock.id).await.unwrap().quantity(), 6);

        let report = svc.duplicate_sales(MaintenanceOptions::default()).await.unwrap();
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].keeper, first.id);
        assert!(report.deleted.is_empty());

        let report = svc.duplicate_sales(APPLY).await.unwrap();
        assert_eq!(report.deleted, vec![second.id]);
        assert_eq!(svc.get_stock(stock.id).await.unwrap().quantity(), 8);
        assert!(svc.get_sale(first.id).await.is_ok());
    }

    #[tokio::test]
    async fn repair_production_drops_orphaned_records() {
        let svc = services();
        let rolls = rolls(&svc, 5).await;
        let stock = bags(&svc, 0).await;
        let records = svc
            .register_production(pelleterp_production::NewProduction {
                date: day(10),
                batch_code: None,
                notes: None,
                consumptions: vec![pelleterp_production::ConsumptionInput {
                    supply_id: rolls.id,
                    quantity: 2,
                }],
                generations: vec![pelleterp_production::GenerationInput {
                    stock_id: stock.id,
                    quantity: 40,
                }],
            })
            .await
            .unwrap();
        let mut gone = Changeset::new();
        gone.delete(&records.production);
        svc.store().commit(gone).await.unwrap();

        let report = svc.repair_production(APPLY).await.unwrap();
        assert_eq!(report.findings.len(), 3);
        assert!(svc.store().list::<SupplyConsumption>().await.unwrap().is_empty());
        assert!(svc.store().list::<PelletGeneration>().await.unwrap().is_empty());
    }
}
