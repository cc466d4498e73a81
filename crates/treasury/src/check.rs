//! Checks (paper cheques and echeqs) and their lifecycle.
//!
//! Received checks: `in_portfolio → deposited | endorsed | rejected`,
//! `deposited → cleared | rejected`, `endorsed → rejected`.
//! Issued checks: `issued → debited | voided`.
//! Anything else is a conflict.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use pelleterp_core::{DomainError, DomainResult, Money, entity_id, impl_document};
use pelleterp_invoicing::Counterparty;
use pelleterp_parties::SupplierId;

use crate::payment::PaymentId;

entity_id!(CheckId, "check id");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    #[default]
    Physical,
    Echeq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckDirection {
    Received,
    Issued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    InPortfolio,
    Deposited,
    Endorsed,
    Cleared,
    Rejected,
    Issued,
    Debited,
    Voided,
}

impl CheckStatus {
    pub fn initial(direction: CheckDirection) -> Self {
        match direction {
            CheckDirection::Received => CheckStatus::InPortfolio,
            CheckDirection::Issued => CheckStatus::Issued,
        }
    }

    /// Still waiting for its payment date.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            CheckStatus::InPortfolio | CheckStatus::Deposited | CheckStatus::Issued
        )
    }
}

impl core::str::FromStr for CheckStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "in_portfolio" => CheckStatus::InPortfolio,
            "deposited" => CheckStatus::Deposited,
            "endorsed" => CheckStatus::Endorsed,
            "cleared" => CheckStatus::Cleared,
            "rejected" => CheckStatus::Rejected,
            "issued" => CheckStatus::Issued,
            "debited" => CheckStatus::Debited,
            "voided" => CheckStatus::Voided,
            other => {
                return Err(DomainError::validation(format!("unknown check status '{other}'")));
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckAction {
    Deposit,
    Clear,
    Reject,
    Void,
    Debit,
    Endorse,
}

fn next_status(
    direction: CheckDirection,
    from: CheckStatus,
    action: CheckAction,
) -> Option<CheckStatus> {
    use CheckAction as A;
    use CheckStatus as S;
    match (direction, from, action) {
        (CheckDirection::Received, S::InPortfolio, A::Deposit) => Some(S::Deposited),
        (CheckDirection::Received, S::InPortfolio, A::Endorse) => Some(S::Endorsed),
        (CheckDirection::Received, S::InPortfolio, A::Reject) => Some(S::Rejected),
        (CheckDirection::Received, S::Deposited, A::Clear) => Some(S::Cleared),
        (CheckDirection::Received, S::Deposited, A::Reject) => Some(S::Rejected),
        (CheckDirection::Received, S::Endorsed, A::Reject) => Some(S::Rejected),
        (CheckDirection::Issued, S::Issued, A::Debit) => Some(S::Debited),
        (CheckDirection::Issued, S::Issued, A::Void) => Some(S::Voided),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: Option<CheckStatus>,
    pub to: CheckStatus,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewCheck {
    #[serde(default)]
    pub kind: CheckKind,
    pub direction: CheckDirection,
    pub number: String,
    pub bank: String,
    #[serde(default)]
    pub drawer_name: Option<String>,
    #[serde(default)]
    pub drawer_tax_id: Option<String>,
    pub amount: Money,
    pub issue_date: NaiveDate,
    pub payment_date: NaiveDate,
    #[serde(default)]
    pub counterparty: Option<Counterparty>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub id: CheckId,
    pub kind: CheckKind,
    direction: CheckDirection,
    pub number: String,
    pub bank: String,
    pub drawer_name: Option<String>,
    pub drawer_tax_id: Option<String>,
    amount: Money,
    pub issue_date: NaiveDate,
    pub payment_date: NaiveDate,
    status: CheckStatus,
    counterparty: Option<Counterparty>,
    payment_id: Option<PaymentId>,
    endorsed_to: Option<SupplierId>,
    /// Outgoing payment created when the check was endorsed.
    endorsement_payment_id: Option<PaymentId>,
    history: Vec<StatusChange>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl_document!(Check, "checks");

fn required(value: &str, what: &str) -> DomainResult<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(DomainError::validation(format!("{what} is required")));
    }
    Ok(v.to_string())
}

/// Last payment date of a window of `days` starting `today`.
pub fn upcoming_horizon(today: NaiveDate, days: i64) -> DomainResult<NaiveDate> {
    if days < 0 {
        return Err(DomainError::validation("days must not be negative"));
    }
    Duration::try_days(days)
        .and_then(|window| today.checked_add_signed(window))
        .ok_or_else(|| DomainError::validation(format!("a window of {days} days is out of range")))
}

impl Check {
    pub fn create(input: NewCheck, now: DateTime<Utc>) -> DomainResult<Self> {
        input.amount.ensure_positive("check amount")?;
        if input.payment_date < input.issue_date {
            return Err(DomainError::validation(
                "payment date cannot be before the issue date",
            ));
        }
        match (input.direction, input.counterparty) {
            (CheckDirection::Received, Some(Counterparty::Supplier(_))) => {
                return Err(DomainError::validation("received checks come from a client"));
            }
            (CheckDirection::Issued, Some(Counterparty::Client(_))) => {
                return Err(DomainError::validation("issued checks go to a supplier"));
            }
            _ => {}
        }
        let status = CheckStatus::initial(input.direction);
        Ok(Self {
            id: CheckId::new(),
            kind: input.kind,
            direction: input.direction,
            number: required(&input.number, "check number")?,
            bank: required(&input.bank, "bank")?,
            drawer_name: input.drawer_name.filter(|n| !n.trim().is_empty()),
            drawer_tax_id: input.drawer_tax_id.filter(|n| !n.trim().is_empty()),
            amount: input.amount,
            issue_date: input.issue_date,
            payment_date: input.payment_date,
            status,
            counterparty: input.counterparty,
            payment_id: None,
            endorsed_to: None,
            endorsement_payment_id: None,
            history: vec![StatusChange {
                from: None,
                to: status,
                at: now,
                note: None,
            }],
            notes: input.notes.filter(|n| !n.trim().is_empty()),
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    pub fn direction(&self) -> CheckDirection {
        self.direction
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn status(&self) -> CheckStatus {
        self.status
    }

    pub fn counterparty(&self) -> Option<Counterparty> {
        self.counterparty
    }

    pub fn payment_id(&self) -> Option<PaymentId> {
        self.payment_id
    }

    pub fn endorsed_to(&self) -> Option<SupplierId> {
        self.endorsed_to
    }

    pub fn endorsement_payment_id(&self) -> Option<PaymentId> {
        self.endorsement_payment_id
    }

    pub fn history(&self) -> &[StatusChange] {
        &self.history
    }

    /// Attach the payment this check settles.
    pub fn attach_payment(&mut self, payment_id: PaymentId, counterparty: Counterparty) -> DomainResult<()> {
        if let Some(existing) = self.payment_id {
            return Err(DomainError::conflict(format!(
                "check is already attached to payment {existing}"
            )));
        }
        self.payment_id = Some(payment_id);
        self.counterparty = Some(counterparty);
        Ok(())
    }

    /// Whether deleting its payment may delete the check as well.
    pub fn is_untouched(&self) -> bool {
        matches!(self.status, CheckStatus::InPortfolio | CheckStatus::Issued)
    }

    /// Pending and payable on or before `horizon` (overdue checks included).
    pub fn is_due_by(&self, horizon: NaiveDate) -> bool {
        self.status.is_pending() && self.payment_date <= horizon
    }

    fn step(&mut self, action: CheckAction, at: DateTime<Utc>, note: Option<String>) -> DomainResult<CheckStatus> {
        let to = next_status(self.direction, self.status, action).ok_or_else(|| {
            DomainError::conflict(format!(
                "cannot {action:?} a {:?} check in status {:?}",
                self.direction, self.status
            ).to_lowercase())
        })?;
        self.history.push(StatusChange {
            from: Some(self.status),
            to,
            at,
            note: note.filter(|n| !n.trim().is_empty()),
        });
        self.status = to;
        self.updated_at = at;
        Ok(to)
    }

    /// Apply a lifecycle action other than endorsement.
    pub fn transition(
        &mut self,
        action: CheckAction,
        at: DateTime<Utc>,
        note: Option<String>,
    ) -> DomainResult<CheckStatus> {
        if action == CheckAction::Endorse {
            return Err(DomainError::validation("endorsing a check requires a supplier"));
        }
        self.step(action, at, note)
    }

    pub fn endorse(
        &mut self,
        supplier: SupplierId,
        payment_id: PaymentId,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.step(CheckAction::Endorse, at, Some(format!("endorsed to supplier {supplier}")))?;
        self.endorsed_to = Some(supplier);
        self.endorsement_payment_id = Some(payment_id);
        Ok(())
    }
}
