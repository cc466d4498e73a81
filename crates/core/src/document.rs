//! Document contract shared by domain records and the storage layer.
//!
//! Records are persisted as whole JSON documents grouped in collections. Each
//! stored document carries a version that is bumped on every write, which is
//! what the storage layer uses for optimistic concurrency.

use serde::{Serialize, de::DeserializeOwned};

use crate::error::{DomainError, DomainResult};
use crate::id::AggregateId;

/// A persistable domain record.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection (table/bucket) the record lives in.
    const COLLECTION: &'static str;

    /// Storage key of this record.
    fn key(&self) -> AggregateId;

    /// Version this record was loaded at (`0` for a record never stored).
    fn version(&self) -> u64;

    /// Set by the storage layer after load/commit.
    fn set_version(&mut self, version: u64);
}

/// Optimistic concurrency expectation for a write.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (maintenance rewrites).
    Any,
    /// Require the stored record to be at an exact version; `Exact(0)` means
    /// the record must not exist yet.
    Exact(u64),
}

impl ExpectedVersion {
    /// Expectation for writing back a record loaded at `version`.
    pub fn of<D: Document>(doc: &D) -> Self {
        ExpectedVersion::Exact(doc.version())
    }

    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

/// Implement [`Document`] for a struct with `id` and `version` fields.
///
/// The `version` field should be `#[serde(default)]`; the storage row's
/// version overrides whatever the stored body carries.
#[macro_export]
macro_rules! impl_document {
    ($t:ty, $collection:literal) => {
        impl $crate::Document for $t {
            const COLLECTION: &'static str = $collection;

            fn key(&self) -> $crate::AggregateId {
                self.id.0
            }

            fn version(&self) -> u64 {
                self.version
            }

            fn set_version(&mut self, version: u64) {
                self.version = version;
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_zero_only_matches_absent_records() {
        assert!(ExpectedVersion::Exact(0).matches(0));
        assert!(!ExpectedVersion::Exact(0).matches(1));
        assert!(ExpectedVersion::Any.matches(7));
    }

    #[test]
    fn failed_check_is_a_conflict() {
        let err = ExpectedVersion::Exact(2).check(3).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }
}
