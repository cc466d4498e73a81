//! Tax identity of a party (CUIT + IVA condition) and contact data.

use serde::{Deserialize, Serialize};

use pelleterp_core::{DomainError, DomainResult};

/// IVA (VAT) condition of a party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxCondition {
    ResponsableInscripto,
    Monotributo,
    #[default]
    ConsumidorFinal,
    Exento,
}

impl TaxCondition {
    /// Whether invoices issued *by* a party in this condition discriminate VAT.
    pub fn discriminates_vat(self) -> bool {
        matches!(self, TaxCondition::ResponsableInscripto)
    }
}

/// Normalize and validate a CUIT/CUIL.
///
/// Dashes, dots and spaces are ignored; the result must be 11 digits with a
/// valid mod-11 check digit. Blank input yields `None`.
pub fn normalize_tax_id(raw: &str) -> DomainResult<Option<String>> {
    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, '-' | '.' | ' '))
        .collect();
    if digits.is_empty() {
        return Ok(None);
    }
    if digits.len() != 11 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(DomainError::validation("tax id must have 11 digits"));
    }

    const WEIGHTS: [u32; 10] = [5, 4, 3, 2, 7, 6, 5, 4, 3, 2];
    let values: Vec<u32> = digits.chars().filter_map(|c| c.to_digit(10)).collect();
    let sum: u32 = values.iter().zip(WEIGHTS.iter()).map(|(d, w)| d * w).sum();
    let check = match 11 - (sum % 11) {
        11 => 0,
        10 => return Err(DomainError::validation("tax id has an invalid check digit")),
        n => n,
    };
    if values[10] != check {
        return Err(DomainError::validation("tax id has an invalid check digit"));
    }
    Ok(Some(digits))
}

/// Contact information for a party.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
}

impl ContactInfo {
    /// Trim fields, drop blanks and sanity-check the email.
    pub fn normalized(self) -> DomainResult<Self> {
        let clean = |v: Option<String>| {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        };
        let email = clean(self.email);
        if let Some(email) = &email {
            if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
                return Err(DomainError::validation("email is not valid"));
            }
        }
        Ok(Self {
            email,
            phone: clean(self.phone),
            address: clean(self.address),
            city: clean(self.city),
        })
    }
}

/// Trimmed, non-blank name.
pub(crate) fn require_name(raw: &str) -> DomainResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(DomainError::validation("name is required"));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tax_id_accepts_formatted_valid_cuit() {
        assert_eq!(
            normalize_tax_id("20-12345678-6").unwrap(),
            Some("20123456786".to_string())
        );
        assert_eq!(
            normalize_tax_id("30.71234567.1").unwrap(),
            Some("30712345671".to_string())
        );
    }

    #[test]
    fn tax_id_rejects_bad_check_digit_and_length() {
        assert!(normalize_tax_id("20-12345678-5").is_err());
        assert!(normalize_tax_id("2012345678").is_err());
        assert!(normalize_tax_id("20-1234567A-6").is_err());
    }

    #[test]
    fn blank_tax_id_is_none() {
        assert_eq!(normalize_tax_id("  ").unwrap(), None);
    }

    #[test]
    fn contact_normalization_drops_blanks() {
        let contact = ContactInfo {
            email: Some("  ".to_string()),
            phone: Some(" 2262 44-1234 ".to_string()),
            ..Default::default()
        }
        .normalized()
        .unwrap();
        assert_eq!(contact.email, None);
        assert_eq!(contact.phone.as_deref(), Some("2262 44-1234"));
    }

    #[test]
    fn contact_rejects_malformed_email() {
        let err = ContactInfo {
            email: Some("ventas.example.com".to_string()),
            ..Default::default()
        }
        .normalized()
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
