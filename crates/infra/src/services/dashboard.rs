use chrono::{Datelike, NaiveDate, Utc};
use serde::Serialize;
use tracing::instrument;

use pelleterp_core::Money;
use pelleterp_invoicing::{Invoice, InvoiceKind};
use pelleterp_parties::{Client, Supplier};
use pelleterp_production::Production;
use pelleterp_sales::Sale;
use pelleterp_treasury::{Check, CheckStatus};

use super::{ServiceResult, Services};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LowItem {
    pub id: uuid::Uuid,
    pub name: String,
    pub quantity: i64,
    pub min_quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub clients: usize,
    pub suppliers: usize,
    /// Open sales plus sale invoices not linked to a sale.
    pub receivables: Money,
    pub payables: Money,
    /// Sum of positive client credit balances.
    pub client_credit: Money,
    pub checks_in_portfolio: usize,
    pub checks_in_portfolio_amount: Money,
    pub low_stock: Vec<LowItem>,
    pub low_supplies: Vec<LowItem>,
    /// Generated quantity of batches dated in the current month.
    pub generated_this_month: i64,
}

impl Services {
    #[instrument(skip(self), err)]
    pub async fn dashboard(&self) -> ServiceResult<DashboardSummary> {
        self.dashboard_at(Utc::now().date_naive()).await
    }

    pub(crate) async fn dashboard_at(&self, today: NaiveDate) -> ServiceResult<DashboardSummary> {
        let store = self.store();
        let clients = store.list::<Client>().await?;
        let invoices = store.list::<Invoice>().await?;

        let open_sales = store.list::<Sale>().await?.into_iter().map(|s| s.outstanding());
        let unlinked = invoices
            .iter()
            .filter(|i| i.kind() == InvoiceKind::Sale && i.sale_id().is_none())
            .map(|i| i.outstanding());
        let receivables = Money::sum(open_sales.chain(unlinked))?;
        let payables = Money::sum(
            invoices
                .iter()
                .filter(|i| i.kind() == InvoiceKind::Purchase)
                .map(|i| i.outstanding()),
        )?;
        let client_credit = Money::sum(
            clients
                .iter()
                .map(|c| c.credit_balance())
                .filter(|b| b.is_positive()),
        )?;

        let portfolio: Vec<Check> = store
            .list::<Check>()
            .await?
            .into_iter()
            .filter(|c| c.status() == CheckStatus::InPortfolio)
            .collect();
        let checks_in_portfolio_amount = Money::sum(portfolio.iter().map(|c| c.amount()))?;

        let low_stock = self
            .low_stock()
            .await?
            .into_iter()
            .map(|s| LowItem {
                id: *s.id.0.as_uuid(),
                quantity: s.quantity(),
                min_quantity: s.min_quantity(),
                name: s.name,
            })
            .collect();
        let low_supplies = self
            .low_supplies()
            .await?
            .into_iter()
            .map(|s| LowItem {
                id: *s.id.0.as_uuid(),
                quantity: s.quantity(),
                min_quantity: s.min_quantity(),
                name: s.name,
            })
            .collect();

        let generated_this_month = store
            .list::<Production>()
            .await?
            .iter()
            .filter(|p| p.date.year() == today.year() && p.date.month() == today.month())
            .map(|p| p.total_generated)
            .sum();

        Ok(DashboardSummary {
            clients: clients.len(),
            suppliers: store.list::<Supplier>().await?.len(),
            receivables,
            payables,
            client_credit,
            checks_in_portfolio: portfolio.len(),
            checks_in_portfolio_amount,
            low_stock,
            low_supplies,
            generated_this_month,
        })
    }
}

#[cfg(test)]
mod tests {
    use pelleterp_invoicing::{Counterparty, InvoiceNumber, LineInput, NewPurchaseInvoice, TaxRate};
    use pelleterp_production::{ConsumptionInput, GenerationInput, NewProduction};
    use pelleterp_sales::{NewSale, SaleLineInput};
    use pelleterp_treasury::{PaymentDirection, PaymentMethod};

    use super::*;
    use crate::services::payments::PaymentRequest;
    use crate::services::testing::*;

    #[tokio::test]
    async fn summary_adds_up_open_items() {
        let svc = services();
        let c = client(&svc, "Forrajera del Sur").await;
        let s = supplier(&svc, "Alfalfas Pampeanas").await;
        let stock = bags(&svc, 6).await;
        let rolls = rolls(&svc, 2).await;

        svc.create_sale(NewSale {
            client_id: c.id,
            date: day(3),
            lines: vec![SaleLineInput {
                stock_id: stock.id,
                description: None,
                quantity: 2,
                unit_price: cents(10_000),
            }],
            notes: None,
            apply_credit: false,
            allow_duplicate: false,
        })
        .await
        .unwrap();
        svc.create_payment(PaymentRequest {
            direction: PaymentDirection::Incoming,
            counterparty: Counterparty::Client(c.id),
            date: day(4),
            amount: cents(25_000),
            method: PaymentMethod::Cash,
            check: None,
            targets: Vec::new(),
            auto_allocate: true,
            notes: None,
        })
        .await
        .unwrap();
        svc.create_purchase_invoice(NewPurchaseInvoice {
            supplier_id: s.id,
            number: InvoiceNumber::new(1, 1).unwrap(),
            letter: None,
            issue_date: day(4),
            due_date: None,
            lines: vec![LineInput {
                description: "Flete".into(),
                quantity: 1,
                unit_price: cents(10_000),
                tax_rate: TaxRate::EXEMPT,
                stock_id: None,
                supply_id: None,
            }],
            notes: None,
        })
        .await
        .unwrap();
        svc.register_production(NewProduction {
            date: day(5),
            batch_code: None,
            notes: None,
            consumptions: vec![ConsumptionInput {
                supply_id: rolls.id,
                quantity: 1,
            }],
            generations: vec![GenerationInput {
                stock_id: stock.id,
                quantity: 30,
            }],
        })
        .await
        .unwrap();

        let summary = svc.dashboard_at(day(20)).await.unwrap();
        assert_eq!(summary.clients, 1);
        assert_eq!(summary.suppliers, 1);
        assert_eq!(summary.receivables, Money::ZERO);
        assert_eq!(summary.client_credit, cents(5_000));
        assert_eq!(summary.payables, cents(10_000));
        assert_eq!(summary.generated_this_month, 30);
        assert!(summary.low_stock.is_empty());
        assert_eq!(summary.low_supplies.len(), 1);
        assert_eq!(summary.checks_in_portfolio, 0);

        let next_month = svc
            .dashboard_at(NaiveDate::from_ymd_opt(2024, 6, 2).unwrap())
            .await
            .unwrap();
        assert_eq!(next_month.generated_this_month, 0);
    }
}
