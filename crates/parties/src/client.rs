use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pelleterp_core::{AggregateId, DomainError, DomainResult, Money, entity_id, impl_document};

use crate::tax::{ContactInfo, TaxCondition, normalize_tax_id, require_name};

entity_id!(
    /// Client identifier.
    ClientId,
    "client id"
);

/// Why a client's credit balance moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditEntryKind {
    /// Overpayment left over after allocating an incoming payment.
    PaymentExcess,
    /// Credit consumed to pay a sale.
    AppliedToSale,
    /// Manual adjustment by an operator.
    Manual,
    /// Undo of a previous entry (deleted payment, rejected check).
    Reversal,
}

/// One movement of a client's credit balance (`amount > 0` credits the client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditEntry {
    pub amount: Money,
    pub kind: CreditEntryKind,
    pub payment_id: Option<AggregateId>,
    pub sale_id: Option<AggregateId>,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

impl CreditEntry {
    pub fn new(amount: Money, kind: CreditEntryKind, at: DateTime<Utc>) -> Self {
        Self {
            amount,
            kind,
            payment_id: None,
            sale_id: None,
            note: None,
            at,
        }
    }

    pub fn for_payment(mut self, payment_id: AggregateId) -> Self {
        self.payment_id = Some(payment_id);
        self
    }

    pub fn for_sale(mut self, sale_id: AggregateId) -> Self {
        self.sale_id = Some(sale_id);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Input for registering a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NewClient {
    pub name: String,
    #[serde(default)]
    pub tax_id: Option<String>,
    #[serde(default)]
    pub tax_condition: TaxCondition,
    #[serde(default)]
    pub contact: ContactInfo,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Partial update; `None` keeps the current value. An empty `tax_id` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClientPatch {
    pub name: Option<String>,
    pub tax_id: Option<String>,
    pub tax_condition: Option<TaxCondition>,
    pub contact: Option<ContactInfo>,
    pub notes: Option<String>,
    pub active: Option<bool>,
}

/// A client (buyer of pellets).
///
/// Invariant: `credit_balance == Σ credit_ledger.amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub tax_id: Option<String>,
    pub tax_condition: TaxCondition,
    pub contact: ContactInfo,
    pub notes: Option<String>,
    pub active: bool,
    credit_balance: Money,
    #[serde(default)]
    credit_ledger: Vec<CreditEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl_document!(Client, "clients");

impl Client {
    pub fn register(input: NewClient, now: DateTime<Utc>) -> DomainResult<Self> {
        let tax_id = match input.tax_id.as_deref() {
            Some(raw) => normalize_tax_id(raw)?,
            None => None,
        };
        Ok(Self {
            id: ClientId::new(),
            name: require_name(&input.name)?,
            tax_id,
            tax_condition: input.tax_condition,
            contact: input.contact.normalized()?,
            notes: input.notes.filter(|n| !n.trim().is_empty()),
            active: true,
            credit_balance: Money::ZERO,
            credit_ledger: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    pub fn credit_balance(&self) -> Money {
        self.credit_balance
    }

    pub fn credit_ledger(&self) -> &[CreditEntry] {
        &self.credit_ledger
    }

    /// Suspended clients cannot receive new sales.
    pub fn can_transact(&self) -> bool {
        self.active
    }

    pub fn apply_patch(&mut self, patch: ClientPatch, now: DateTime<Utc>) -> DomainResult<()> {
        if let Some(name) = patch.name {
            self.name = require_name(&name)?;
        }
        if let Some(raw) = patch.tax_id {
            self.tax_id = normalize_tax_id(&raw)?;
        }
        if let Some(condition) = patch.tax_condition {
            self.tax_condition = condition;
        }
        if let Some(contact) = patch.contact {
            self.contact = contact.normalized()?;
        }
        if let Some(notes) = patch.notes {
            self.notes = Some(notes).filter(|n| !n.trim().is_empty());
        }
        if let Some(active) = patch.active {
            self.active = active;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Post a movement to the credit ledger and update the balance.
    ///
    /// - `payment_excess` must credit (positive amount).
    /// - `applied_to_sale` must debit and the balance must cover it.
    /// - `manual` debits may not take the balance below zero.
    /// - `reversal` may leave the balance negative: the client then owes the
    ///   credit it already consumed (e.g. a bounced check).
    pub fn post_credit(&mut self, entry: CreditEntry) -> DomainResult<()> {
        if entry.amount.is_zero() {
            return Err(DomainError::validation("credit movement amount must not be zero"));
        }
        match entry.kind {
            CreditEntryKind::PaymentExcess if entry.amount.is_negative() => {
                return Err(DomainError::validation("payment excess must be positive"));
            }
            CreditEntryKind::AppliedToSale if entry.amount.is_positive() => {
                return Err(DomainError::validation("credit applied to a sale must be a debit"));
            }
            _ => {}
        }

        let next = self.credit_balance.checked_add(entry.amount)?;
        let guarded = matches!(
            entry.kind,
            CreditEntryKind::AppliedToSale | CreditEntryKind::Manual
        );
        if guarded && entry.amount.is_negative() && next.is_negative() {
            return Err(DomainError::invariant(format!(
                "insufficient credit balance (available {}, requested {})",
                self.credit_balance, -entry.amount
            )));
        }

        self.credit_balance = next;
        self.updated_at = entry.at;
        self.credit_ledger.push(entry);
        Ok(())
    }

    /// Balance implied by the ledger.
    pub fn ledger_balance(&self) -> DomainResult<Money> {
        Money::sum(self.credit_ledger.iter().map(|e| e.amount))
    }

    /// Reset the stored balance to the ledger sum. Returns the previous
    /// balance when it drifted.
    pub fn resync_balance(&mut self) -> DomainResult<Option<Money>> {
        let expected = self.ledger_balance()?;
        if expected == self.credit_balance {
            return Ok(None);
        }
        let previous = self.credit_balance;
        self.credit_balance = expected;
        Ok(Some(previous))
    }

    /// Drop ledger entries pointing at payments that no longer exist.
    /// Returns the removed entries; the balance is resynced.
    pub fn drop_entries_for_missing_payments(
        &mut self,
        exists: impl Fn(AggregateId) -> bool,
    ) -> DomainResult<Vec<CreditEntry>> {
        let (kept, dropped): (Vec<_>, Vec<_>) = self
            .credit_ledger
            .drain(..)
            .partition(|e| e.payment_id.map_or(true, |p| exists(p)));
        self.credit_ledger = kept;
        if !dropped.is_empty() {
            self.resync_balance()?;
        }
        Ok(dropped)
    }

    /// Search helper: case-insensitive substring over name and tax id.
    pub fn matches(&self, query: &str) -> bool {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return true;
        }
        self.name.to_lowercase().contains(&q)
            || self
                .tax_id
                .as_deref()
                .is_some_and(|t| t.contains(&q.replace('-', "")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn client() -> Client {
        Client::register(
            NewClient {
                name: "  Agro La Pampa  ".to_string(),
                tax_id: Some("20-12345678-6".to_string()),
                tax_condition: TaxCondition::ResponsableInscripto,
                ..Default::default()
            },
            now(),
        )
        .unwrap()
    }

    #[test]
    fn register_trims_and_normalizes() {
        let c = client();
        assert_eq!(c.name, "Agro La Pampa");
        assert_eq!(c.tax_id.as_deref(), Some("20123456786"));
        assert!(c.active);
        assert_eq!(c.credit_balance(), Money::ZERO);
    }

    #[test]
    fn register_requires_name() {
        let err = Client::register(NewClient::default(), now()).unwrap_err();
        assert_eq!(err, DomainError::validation("name is required"));
    }

    #[test]
    fn excess_credit_then_apply_to_sale() {
        let mut c = client();
        let payment = AggregateId::new();
        c.post_credit(
            CreditEntry::new(Money::from_cents(5_000), CreditEntryKind::PaymentExcess, now())
                .for_payment(payment),
        )
        .unwrap();
        c.post_credit(CreditEntry::new(
            Money::from_cents(-3_000),
            CreditEntryKind::AppliedToSale,
            now(),
        ))
        .unwrap();
        assert_eq!(c.credit_balance(), Money::from_cents(2_000));
        assert_eq!(c.credit_ledger().len(), 2);
        assert_eq!(c.ledger_balance().unwrap(), c.credit_balance());
    }

    #[test]
    fn cannot_apply_more_credit_than_available() {
        let mut c = client();
        let err = c
            .post_credit(CreditEntry::new(
                Money::from_cents(-1),
                CreditEntryKind::AppliedToSale,
                now(),
            ))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert!(c.credit_ledger().is_empty());
    }

    #[test]
    fn manual_debit_cannot_go_negative_but_reversal_can() {
        let mut c = client();
        assert!(
            c.post_credit(CreditEntry::new(Money::from_cents(-100), CreditEntryKind::Manual, now()))
                .is_err()
        );
        c.post_credit(CreditEntry::new(Money::from_cents(-100), CreditEntryKind::Reversal, now()))
            .unwrap();
        assert_eq!(c.credit_balance(), Money::from_cents(-100));
    }

    #[test]
    fn dropping_entries_for_missing_payments_resyncs_balance() {
        let mut c = client();
        let kept = AggregateId::new();
        let gone = AggregateId::new();
        c.post_credit(
            CreditEntry::new(Money::from_cents(700), CreditEntryKind::PaymentExcess, now())
                .for_payment(kept),
        )
        .unwrap();
        c.post_credit(
            CreditEntry::new(Money::from_cents(300), CreditEntryKind::PaymentExcess, now())
                .for_payment(gone),
        )
        .unwrap();

        let dropped = c.drop_entries_for_missing_payments(|p| p == kept).unwrap();
        assert_eq!(dropped.len(), 1);
        assert_eq!(c.credit_balance(), Money::from_cents(700));
    }

    #[test]
    fn patch_updates_fields_and_rejects_bad_tax_id() {
        let mut c = client();
        c.apply_patch(
            ClientPatch {
                name: Some("Agro Pampa SA".to_string()),
                tax_id: Some(String::new()),
                active: Some(false),
                ..Default::default()
            },
            now(),
        )
        .unwrap();
        assert_eq!(c.name, "Agro Pampa SA");
        assert_eq!(c.tax_id, None);
        assert!(!c.can_transact());

        let err = c
            .apply_patch(
                ClientPatch {
                    tax_id: Some("123".to_string()),
                    ..Default::default()
                },
                now(),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn search_matches_name_and_tax_id() {
        let c = client();
        assert!(c.matches("pampa"));
        assert!(c.matches("20-1234"));
        assert!(!c.matches("molino"));
    }
}
