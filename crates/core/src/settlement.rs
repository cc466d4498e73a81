//! Settlement status shared by sales and invoices.

use serde::{Deserialize, Serialize};

use crate::money::Money;

/// How much of a document's total has been paid.
///
/// Never stored independently of the amounts it is derived from: records call
/// [`SettlementStatus::derive`] whenever `total`, `paid` or the cancellation
/// flag change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Partial,
    Paid,
    Cancelled,
}

impl SettlementStatus {
    pub fn derive(total: Money, paid: Money, cancelled: bool) -> Self {
        if cancelled {
            SettlementStatus::Cancelled
        } else if paid <= Money::ZERO {
            SettlementStatus::Pending
        } else if paid < total {
            SettlementStatus::Partial
        } else {
            SettlementStatus::Paid
        }
    }

    /// Whether the document can still receive payments.
    pub fn is_open(self) -> bool {
        matches!(self, SettlementStatus::Pending | SettlementStatus::Partial)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Partial => "partial",
            SettlementStatus::Paid => "paid",
            SettlementStatus::Cancelled => "cancelled",
        }
    }
}

impl core::str::FromStr for SettlementStatus {
    type Err = crate::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(SettlementStatus::Pending),
            "partial" => Ok(SettlementStatus::Partial),
            "paid" => Ok(SettlementStatus::Paid),
            "cancelled" => Ok(SettlementStatus::Cancelled),
            other => Err(crate::DomainError::validation(format!(
                "unknown status '{other}' (expected pending, partial, paid or cancelled)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn m(c: i64) -> Money {
        Money::from_cents(c)
    }

    #[test]
    fn derives_from_paid_amount() {
        assert_eq!(SettlementStatus::derive(m(100), m(0), false), SettlementStatus::Pending);
        assert_eq!(SettlementStatus::derive(m(100), m(30), false), SettlementStatus::Partial);
        assert_eq!(SettlementStatus::derive(m(100), m(100), false), SettlementStatus::Paid);
        assert_eq!(SettlementStatus::derive(m(100), m(130), false), SettlementStatus::Paid);
    }

    #[test]
    fn cancellation_wins() {
        assert_eq!(SettlementStatus::derive(m(100), m(100), true), SettlementStatus::Cancelled);
    }

    proptest! {
        #[test]
        fn open_iff_positive_outstanding(total in 1i64..1_000_000, paid in 0i64..2_000_000) {
            let status = SettlementStatus::derive(m(total), m(paid), false);
            prop_assert_eq!(status.is_open(), paid < total);
        }
    }
}
