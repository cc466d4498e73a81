//! Reserved natural keys: sale invoice numbers, supplier invoice numbers and
//! production batch codes.
//!
//! A key is a small record whose id is derived from the key text. It is put
//! with `Exact(0)` in the same changeset as the record taking the key, so of
//! two writers racing for one key only the first commit succeeds. Deleting
//! the owner deletes its key in the same changeset.

use serde::{Deserialize, Serialize};

use pelleterp_core::{AggregateId, ExpectedVersion, entity_id, impl_document};
use pelleterp_invoicing::{InvoiceLetter, InvoiceNumber};
use pelleterp_parties::SupplierId;

use super::{ServiceResult, Work};

entity_id!(UniqueKeyId, "unique key id");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueKey {
    pub id: UniqueKeyId,
    pub key: String,
    /// Record holding the key.
    pub owner: AggregateId,
    #[serde(default)]
    pub version: u64,
}

impl_document!(UniqueKey, "unique_keys");

const SALE_INVOICE: &str = "sale-invoice/";
const PURCHASE_INVOICE: &str = "purchase-invoice/";
const BATCH: &str = "batch/";

impl UniqueKey {
    pub fn new(key: String, owner: AggregateId) -> Self {
        Self {
            id: UniqueKeyId(AggregateId::derived(&key)),
            key,
            owner,
            version: 0,
        }
    }

    pub fn sale_invoice(letter: InvoiceLetter, number: InvoiceNumber) -> String {
        format!("{SALE_INVOICE}{letter:?}/{number}")
    }

    pub fn purchase_invoice(supplier: SupplierId, letter: InvoiceLetter, number: InvoiceNumber) -> String {
        format!("{PURCHASE_INVOICE}{supplier}/{letter:?}/{number}")
    }

    pub fn batch_code(code: &str) -> String {
        format!("{BATCH}{code}")
    }

    pub fn is_invoice_key(&self) -> bool {
        self.key.starts_with(SALE_INVOICE) || self.key.starts_with(PURCHASE_INVOICE)
    }

    pub fn is_batch_key(&self) -> bool {
        self.key.starts_with(BATCH)
    }
}

impl Work {
    /// Take `key` for `owner`; the commit fails with a conflict if the key
    /// was taken in the meantime.
    pub(crate) fn claim_key(&mut self, key: String, owner: impl Into<AggregateId>) -> ServiceResult<()> {
        let doc = UniqueKey::new(key, owner.into());
        self.changes.put_expecting(&doc, ExpectedVersion::Exact(0))?;
        Ok(())
    }

    /// Free `key` (no-op when it was never claimed).
    pub(crate) fn release_key(&mut self, key: String, owner: impl Into<AggregateId>) {
        let doc = UniqueKey::new(key, owner.into());
        self.changes.delete_expecting(&doc, ExpectedVersion::Any);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ServiceError;
    use crate::services::testing::services;
    use crate::store::StoreError;

    #[tokio::test]
    async fn second_claim_of_a_key_conflicts() {
        let svc = services();
        let key = UniqueKey::batch_code("L-0042");

        // Two units of work racing: both pass their checks, one commits first.
        let mut first = svc.work();
        let mut second = svc.work();
        first.claim_key(key.clone(), AggregateId::new()).unwrap();
        second.claim_key(key.clone(), AggregateId::new()).unwrap();
        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::Conflict(_))));

        let owner = AggregateId::new();
        let mut freeing = svc.work();
        freeing.release_key(key.clone(), owner);
        freeing.commit().await.unwrap();
        let mut again = svc.work();
        again.claim_key(key, owner).unwrap();
        again.commit().await.unwrap();
    }

    #[test]
    fn keys_are_scoped_by_kind() {
        let number = InvoiceNumber::new(1, 7).unwrap();
        let sale = UniqueKey::new(UniqueKey::sale_invoice(InvoiceLetter::A, number), AggregateId::new());
        let supplier = SupplierId::new();
        let purchase = UniqueKey::new(
            UniqueKey::purchase_invoice(supplier, InvoiceLetter::A, number),
            AggregateId::new(),
        );
        assert_ne!(sale.id, purchase.id);
        assert_eq!(sale.key, "sale-invoice/A/0001-00000007");
        assert!(sale.is_invoice_key() && purchase.is_invoice_key());
        assert!(!sale.is_batch_key());
        assert!(UniqueKey::new(UniqueKey::batch_code("L-1"), AggregateId::new()).is_batch_key());
    }
}
