use chrono::NaiveDate;

use pelleterp_core::{DomainError, DomainResult};

/// Validated batch code (trimmed, uppercase, non-empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchCode(String);

impl BatchCode {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let code = raw.trim().to_uppercase();
        if code.is_empty() {
            return Err(DomainError::validation("batch code must not be blank"));
        }
        if code.len() > 40 {
            return Err(DomainError::validation("batch code is too long"));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Next automatic code for `date`: `P-YYYYMMDD-NNN`, one past the highest
/// sequence already used that day.
pub fn next_batch_code<'a>(date: NaiveDate, existing: impl IntoIterator<Item = &'a str>) -> BatchCode {
    let prefix = format!("P-{}-", date.format("%Y%m%d"));
    let last = existing
        .into_iter()
        .filter_map(|code| code.strip_prefix(&prefix))
        .filter_map(|seq| seq.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    BatchCode(format!("{prefix}{:03}", last + 1))
}
