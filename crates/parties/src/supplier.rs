use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pelleterp_core::{DomainResult, entity_id, impl_document};

use crate::tax::{ContactInfo, TaxCondition, normalize_tax_id, require_name};

entity_id!(
    /// Supplier identifier.
    SupplierId,
    "supplier id"
);

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NewSupplier {
    pub name: String,
    #[serde(default)]
    pub tax_id: Option<String>,
    #[serde(default = "default_supplier_condition")]
    pub tax_condition: TaxCondition,
    #[serde(default)]
    pub contact: ContactInfo,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_supplier_condition() -> TaxCondition {
    TaxCondition::ResponsableInscripto
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SupplierPatch {
    pub name: Option<String>,
    pub tax_id: Option<String>,
    pub tax_condition: Option<TaxCondition>,
    pub contact: Option<ContactInfo>,
    pub notes: Option<String>,
    pub active: Option<bool>,
}

/// A supplier of raw materials (rolls, bags, additives) and services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    pub id: SupplierId,
    pub name: String,
    pub tax_id: Option<String>,
    pub tax_condition: TaxCondition,
    pub contact: ContactInfo,
    pub notes: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl_document!(Supplier, "suppliers");

impl Supplier {
    pub fn register(input: NewSupplier, now: DateTime<Utc>) -> DomainResult<Self> {
        let tax_id = match input.tax_id.as_deref() {
            Some(raw) => normalize_tax_id(raw)?,
            None => None,
        };
        Ok(Self {
            id: SupplierId::new(),
            name: require_name(&input.name)?,
            tax_id,
            tax_condition: input.tax_condition,
            contact: input.contact.normalized()?,
            notes: input.notes.filter(|n| !n.trim().is_empty()),
            active: true,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    pub fn apply_patch(&mut self, patch: SupplierPatch, now: DateTime<Utc>) -> DomainResult<()> {
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

    pub fn matches(&self, query: &str) -> bool {
        let q = query.trim().to_lowercase();
        q.is_empty()
            || self.name.to_lowercase().contains(&q)
            || self.tax_id.as_deref().is_some_and(|t| t.contains(&q.replace('-', "")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppliers_default_to_responsable_inscripto() {
        let input: NewSupplier =
            serde_json::from_str(r#"{"name":"Fardos del Sur"}"#).unwrap();
        let s = Supplier::register(input, Utc::now()).unwrap();
        assert_eq!(s.tax_condition, TaxCondition::ResponsableInscripto);
        assert!(s.active);
    }

    #[test]
    fn patch_can_deactivate() {
        let mut s = Supplier::register(
            NewSupplier {
                name: "Bolsas Norte".to_string(),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        s.apply_patch(
            SupplierPatch {
                active: Some(false),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        assert!(!s.active);
    }
}
