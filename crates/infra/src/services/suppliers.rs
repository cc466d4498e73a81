use serde::Deserialize;
use tracing::{info, instrument};

use pelleterp_core::DomainError;
use pelleterp_invoicing::{Counterparty, Invoice};
use pelleterp_parties::{NewSupplier, Supplier, SupplierId, SupplierPatch};
use pelleterp_treasury::{Check, Payment};

use super::{ServiceResult, Services};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SupplierQuery {
    pub search: Option<String>,
    pub active: Option<bool>,
}

impl Services {
    #[instrument(skip_all, err)]
    pub async fn create_supplier(&self, input: NewSupplier) -> ServiceResult<Supplier> {
        let supplier = Supplier::register(input, self.now())?;
        let supplier = self.commit_one(supplier).await?;
        info!(supplier_id = %supplier.id, "supplier created");
        Ok(supplier)
    }

    pub async fn get_supplier(&self, id: SupplierId) -> ServiceResult<Supplier> {
        self.require(id, "supplier").await
    }

    pub async fn list_suppliers(&self, query: &SupplierQuery) -> ServiceResult<Vec<Supplier>> {
        let mut suppliers: Vec<Supplier> = self
            .store()
            .list::<Supplier>()
            .await?
            .into_iter()
            .filter(|s| query.active.is_none_or(|a| s.active == a))
            .filter(|s| query.search.as_deref().is_none_or(|q| s.matches(q)))
            .collect();
        suppliers.sort_by_key(|s| s.name.to_lowercase());
        Ok(suppliers)
    }

    #[instrument(skip(self, patch), fields(supplier_id = %id), err)]
    pub async fn update_supplier(&self, id: SupplierId, patch: SupplierPatch) -> ServiceResult<Supplier> {
        let mut supplier: Supplier = self.require(id, "supplier").await?;
        supplier.apply_patch(patch, self.now())?;
        self.commit_one(supplier).await
    }

    /// Rejected while invoices, payments or checks refer to the supplier.
    #[instrument(skip(self), fields(supplier_id = %id), err)]
    pub async fn delete_supplier(&self, id: SupplierId) -> ServiceResult<()> {
        let supplier: Supplier = self.require(id, "supplier").await?;
        let party = Counterparty::Supplier(id);

        let store = self.store();
        let mut refs = Vec::new();
        if store.list::<Invoice>().await?.iter().any(|i| i.counterparty() == party) {
            refs.push("invoices");
        }
        if store.list::<Payment>().await?.iter().any(|p| p.counterparty() == party) {
            refs.push("payments");
        }
        if store
            .list::<Check>()
            .await?
            .iter()
            .any(|c| c.counterparty() == Some(party) || c.endorsed_to() == Some(id))
        {
            refs.push("checks");
        }
        if !refs.is_empty() {
            return Err(DomainError::conflict(format!(
                "supplier '{}' is referenced by {}",
                supplier.name,
                refs.join(", ")
            ))
            .into());
        }

        let mut work = self.work();
        work.suppliers.track(id, supplier);
        work.suppliers.remove(&id);
        work.commit().await?;
        info!(supplier_id = %id, "supplier deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pelleterp_invoicing::{InvoiceNumber, LineInput, NewPurchaseInvoice, TaxRate};

    use super::*;
    use crate::services::ServiceError;
    use crate::services::testing::*;

    #[tokio::test]
    async fn supplier_with_invoices_cannot_be_deleted() {
        let svc = services();
        let s = supplier(&svc, "Alfalfas Pampeanas").await;
        svc.create_purchase_invoice(NewPurchaseInvoice {
            supplier_id: s.id,
            number: InvoiceNumber::new(3, 120).unwrap(),
            letter: None,
            issue_date: day(2),
            due_date: None,
            lines: vec![LineInput {
                description: "Flete".into(),
                quantity: 1,
                unit_price: cents(50_000),
                tax_rate: TaxRate::GENERAL,
                stock_id: None,
                supply_id: None,
            }],
            notes: None,
        })
        .await
        .unwrap();

        let err = svc.delete_supplier(s.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Conflict(_))));
    }

    #[tokio::test]
    async fn update_renames_and_delete_removes() {
        let svc = services();
        let s = supplier(&svc, "Bolsas SRL").await;
        let renamed = svc
            .update_supplier(
                s.id,
                SupplierPatch {
                    name: Some("Bolsas y Envases SRL".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "Bolsas y Envases SRL");
        assert_eq!(renamed.version, 2);

        svc.delete_supplier(s.id).await.unwrap();
        assert!(svc.list_suppliers(&SupplierQuery::default()).await.unwrap().is_empty());
    }
}
