use serde::{Deserialize, Serialize};

use pelleterp_core::{DomainError, DomainResult};
use pelleterp_parties::TaxCondition;

/// Invoice letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InvoiceLetter {
    #[default]
    A,
    B,
    C,
}

impl InvoiceLetter {
    /// Letter we issue to a client.
    pub fn for_client(condition: TaxCondition) -> Self {
        match condition {
            TaxCondition::ResponsableInscripto => InvoiceLetter::A,
            _ => InvoiceLetter::B,
        }
    }

    /// Letter a supplier issues to us. Monotributo and exento suppliers
    /// always issue C; otherwise the requested letter (default A) stands.
    pub fn for_supplier(condition: TaxCondition, requested: Option<InvoiceLetter>) -> Self {
        match condition {
            TaxCondition::Monotributo | TaxCondition::Exento => InvoiceLetter::C,
            _ => requested.unwrap_or_default(),
        }
    }

    /// Letter C invoices carry no discriminated VAT.
    pub fn discriminates_tax(self) -> bool {
        !matches!(self, InvoiceLetter::C)
    }
}

/// `PPPP-NNNNNNNN`: point of sale and sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InvoiceNumber {
    pub point_of_sale: u32,
    pub sequence: u64,
}

impl InvoiceNumber {
    pub fn new(point_of_sale: u32, sequence: u64) -> DomainResult<Self> {
        if point_of_sale == 0 || point_of_sale > 9_999 {
            return Err(DomainError::validation("point of sale must be between 1 and 9999"));
        }
        if sequence == 0 || sequence > 99_999_999 {
            return Err(DomainError::validation(
                "invoice sequence must be between 1 and 99999999",
            ));
        }
        Ok(Self {
            point_of_sale,
            sequence,
        })
    }

    /// Number following the highest one already used at `point_of_sale`.
    pub fn next(
        point_of_sale: u32,
        used: impl IntoIterator<Item = InvoiceNumber>,
    ) -> DomainResult<Self> {
        let last = used
            .into_iter()
            .filter(|n| n.point_of_sale == point_of_sale)
            .map(|n| n.sequence)
            .max()
            .unwrap_or(0);
        Self::new(point_of_sale, last + 1)
    }
}

impl core::fmt::Display for InvoiceNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:04}-{:08}", self.point_of_sale, self.sequence)
    }
}

impl core::str::FromStr for InvoiceNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::validation(format!("invalid invoice number '{s}' (expected PPPP-NNNNNNNN)"));
        let (pos, seq) = s.trim().split_once('-').ok_or_else(invalid)?;
        if pos.is_empty() || pos.len() > 5 || seq.is_empty() || seq.len() > 8 {
            return Err(invalid());
        }
        let pos = pos.parse::<u32>().map_err(|_| invalid())?;
        let seq = seq.parse::<u64>().map_err(|_| invalid())?;
        Self::new(pos, seq)
    }
}

impl Serialize for InvoiceNumber {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InvoiceNumber {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
