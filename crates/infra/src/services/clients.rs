use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use pelleterp_core::{DomainError, Money};
use pelleterp_invoicing::{Counterparty, Invoice};
use pelleterp_parties::{Client, ClientId, ClientPatch, CreditEntry, CreditEntryKind, NewClient};
use pelleterp_sales::Sale;
use pelleterp_treasury::{Check, Payment};

use super::{ServiceResult, Services};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientQuery {
    /// Substring of the name or tax id.
    pub search: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreditAdjustment {
    /// Positive credits the client, negative debits.
    pub amount: Money,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreditLedger {
    pub client_id: ClientId,
    pub credit_balance: Money,
    pub entries: Vec<CreditEntry>,
}

impl Services {
    #[instrument(skip_all, err)]
    pub async fn create_client(&self, input: NewClient) -> ServiceResult<Client> {
        let client = Client::register(input, self.now())?;
        let client = self.commit_one(client).await?;
        info!(client_id = %client.id, "client created");
        Ok(client)
    }

    pub async fn get_client(&self, id: ClientId) -> ServiceResult<Client> {
        self.require(id, "client").await
    }

    pub async fn list_clients(&self, query: &ClientQuery) -> ServiceResult<Vec<Client>> {
        let mut clients: Vec<Client> = self
            .store()
            .list::<Client>()
            .await?
            .into_iter()
            .filter(|c| query.active.is_none_or(|a| c.active == a))
            .filter(|c| query.search.as_deref().is_none_or(|q| c.matches(q)))
            .collect();
        clients.sort_by_key(|c| c.name.to_lowercase());
        Ok(clients)
    }

    #[instrument(skip(self, patch), fields(client_id = %id), err)]
    pub async fn update_client(&self, id: ClientId, patch: ClientPatch) -> ServiceResult<Client> {
        let mut client: Client = self.require(id, "client").await?;
        client.apply_patch(patch, self.now())?;
        self.commit_one(client).await
    }

    /// Rejected while any sale, invoice, payment or check refers to the client.
    #[instrument(skip(self), fields(client_id = %id), err)]
    pub async fn delete_client(&self, id: ClientId) -> ServiceResult<()> {
        let client: Client = self.require(id, "client").await?;
        let party = Counterparty::Client(id);

        let store = self.store();
        let mut refs = Vec::new();
        if store.list::<Sale>().await?.iter().any(|s| s.client_id == id) {
            refs.push("sales");
        }
        if store.list::<Invoice>().await?.iter().any(|i| i.counterparty() == party) {
            refs.push("invoices");
        }
        if store.list::<Payment>().await?.iter().any(|p| p.counterparty() == party) {
            refs.push("payments");
        }
        if store.list::<Check>().await?.iter().any(|c| c.counterparty() == Some(party)) {
            refs.push("checks");
        }
        if !refs.is_empty() {
            return Err(DomainError::conflict(format!(
                "client '{}' is referenced by {}",
                client.name,
                refs.join(", ")
            ))
            .into());
        }

        let mut work = self.work();
        work.clients.track(id, client);
        work.clients.remove(&id);
        work.commit().await?;
        info!(client_id = %id, "client deleted");
        Ok(())
    }

    /// Manual credit or debit; a debit may not take the balance below zero.
    #[instrument(skip(self, input), fields(client_id = %id, amount = %input.amount), err)]
    pub async fn adjust_credit(&self, id: ClientId, input: CreditAdjustment) -> ServiceResult<CreditLedger> {
        let mut client: Client = self.require(id, "client").await?;
        let mut entry = CreditEntry::new(input.amount, CreditEntryKind::Manual, self.now());
        if let Some(note) = input.note.filter(|n| !n.trim().is_empty()) {
            entry = entry.with_note(note);
        }
        client.post_credit(entry)?;
        let client = self.commit_one(client).await?;
        info!(client_id = %id, balance = %client.credit_balance(), "credit adjusted");
        Ok(ledger_of(client))
    }

    pub async fn credit_ledger(&self, id: ClientId) -> ServiceResult<CreditLedger> {
        let client: Client = self.require(id, "client").await?;
        Ok(ledger_of(client))
    }
}

fn ledger_of(client: Client) -> CreditLedger {
    CreditLedger {
        client_id: client.id,
        credit_balance: client.credit_balance(),
        entries: client.credit_ledger().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use pelleterp_sales::{NewSale, SaleLineInput};

    use super::*;
    use crate::services::ServiceError;
    use crate::services::testing::*;

    #[tokio::test]
    async fn search_matches_name_and_filters_inactive() {
        let svc = services();
        client(&svc, "Forrajera del Sur").await;
        let other = client(&svc, "Agro Norte").await;
        svc.update_client(
            other.id,
            ClientPatch {
                active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let found = svc
            .list_clients(&ClientQuery {
                search: Some("sur".into()),
                active: None,
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let active = svc
            .list_clients(&ClientQuery {
                search: None,
                active: Some(true),
            })
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "Forrajera del Sur");
    }

    #[tokio::test]
    async fn manual_debit_cannot_overdraw_credit() {
        let svc = services();
        let c = client(&svc, "Forrajera del Sur").await;
        let ledger = svc
            .adjust_credit(
                c.id,
                CreditAdjustment {
                    amount: cents(5_000),
                    note: Some("saldo inicial".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(ledger.credit_balance, cents(5_000));

        let err = svc
            .adjust_credit(
                c.id,
                CreditAdjustment {
                    amount: cents(-6_000),
                    note: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::InvariantViolation(_))));
        assert_eq!(svc.credit_ledger(c.id).await.unwrap().entries.len(), 1);
    }

    #[tokio::test]
    async fn client_with_sales_cannot_be_deleted() {
        let svc = services();
        let c = client(&svc, "Forrajera del Sur").await;
        let stock = bags(&svc, 10).await;
        svc.create_sale(NewSale {
            client_id: c.id,
            date: day(3),
            lines: vec![SaleLineInput {
                stock_id: stock.id,
                description: None,
                quantity: 1,
                unit_price: cents(900_000),
            }],
            notes: None,
            apply_credit: false,
            allow_duplicate: false,
        })
        .await
        .unwrap();

        let err = svc.delete_client(c.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Conflict(_))));

        let lonely = client(&svc, "Agro Norte").await;
        svc.delete_client(lonely.id).await.unwrap();
        assert!(matches!(
            svc.get_client(lonely.id).await.unwrap_err(),
            ServiceError::Domain(DomainError::NotFound(_))
        ));
    }
}
