//! Document storage.
//!
//! Records are stored whole, as JSON bodies grouped by collection, each with
//! a version that is bumped on every write. Multi-record operations are
//! expressed as a [`Changeset`] and committed atomically: every expected
//! version is checked first, then all puts/deletes are applied, or none.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

use pelleterp_core::{AggregateId, Document, ExpectedVersion};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryDocumentStore;
pub use postgres::PostgresDocumentStore;

/// A document as stored: body plus its current version.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub collection: String,
    pub id: AggregateId,
    pub version: u64,
    pub body: JsonValue,
}

/// Storage-level error (as opposed to business failures).
#[derive(Debug, Error)]
pub enum StoreError {
    /// An expected version did not match; nothing was written.
    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put {
        collection: &'static str,
        id: AggregateId,
        expected: ExpectedVersion,
        body: JsonValue,
    },
    Delete {
        collection: &'static str,
        id: AggregateId,
        expected: ExpectedVersion,
    },
}

impl WriteOp {
    pub fn collection(&self) -> &'static str {
        match self {
            WriteOp::Put { collection, .. } | WriteOp::Delete { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> AggregateId {
        match self {
            WriteOp::Put { id, .. } | WriteOp::Delete { id, .. } => *id,
        }
    }

    pub fn expected(&self) -> ExpectedVersion {
        match self {
            WriteOp::Put { expected, .. } | WriteOp::Delete { expected, .. } => *expected,
        }
    }
}

/// Writes to apply atomically.
///
/// A record appears at most once: a later put or delete of the same record
/// replaces the earlier op but keeps the first expected version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    ops: Vec<WriteOp>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, op: WriteOp) {
        let existing = self
            .ops
            .iter_mut()
            .find(|o| o.collection() == op.collection() && o.id() == op.id());
        match existing {
            Some(slot) => {
                let expected = slot.expected();
                *slot = match op {
                    WriteOp::Put {
                        collection, id, body, ..
                    } => WriteOp::Put {
                        collection,
                        id,
                        expected,
                        body,
                    },
                    WriteOp::Delete { collection, id, .. } => WriteOp::Delete {
                        collection,
                        id,
                        expected,
                    },
                };
            }
            None => self.ops.push(op),
        }
    }

    /// Write `doc` back, expecting the version it was loaded at
    /// (`0` for a new record).
    pub fn put<D: Document>(&mut self, doc: &D) -> Result<(), StoreError> {
        self.put_expecting(doc, ExpectedVersion::of(doc))
    }

    pub fn put_expecting<D: Document>(
        &mut self,
        doc: &D,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_value(doc)?;
        self.push(WriteOp::Put {
            collection: D::COLLECTION,
            id: doc.key(),
            expected,
            body,
        });
        Ok(())
    }

    pub fn put_all<'a, D: Document>(
        &mut self,
        docs: impl IntoIterator<Item = &'a D>,
    ) -> Result<(), StoreError> {
        for doc in docs {
            self.put(doc)?;
        }
        Ok(())
    }

    pub fn delete<D: Document>(&mut self, doc: &D) {
        self.delete_expecting(doc, ExpectedVersion::of(doc));
    }

    pub fn delete_expecting<D: Document>(&mut self, doc: &D, expected: ExpectedVersion) {
        self.push(WriteOp::Delete {
            collection: D::COLLECTION,
            id: doc.key(),
            expected,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Backend for document storage.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(
        &self,
        collection: &str,
        id: AggregateId,
    ) -> Result<Option<StoredDocument>, StoreError>;

    /// All documents of a collection, in id (creation) order.
    async fn list(&self, collection: &str) -> Result<Vec<StoredDocument>, StoreError>;

    /// Apply a changeset atomically.
    async fn commit(&self, changeset: Changeset) -> Result<(), StoreError>;
}

fn decode<D: Document>(stored: StoredDocument) -> Result<D, StoreError> {
    let mut doc: D = serde_json::from_value(stored.body).map_err(|e| {
        StoreError::Serialization(format!(
            "{} {}: {e}",
            stored.collection, stored.id
        ))
    })?;
    doc.set_version(stored.version);
    Ok(doc)
}

/// Typed access to a [`DocumentStore`].
#[derive(Clone)]
pub struct Store {
    inner: Arc<dyn DocumentStore>,
}

impl Store {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self { inner }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryDocumentStore::new()))
    }

    pub async fn load<D: Document>(&self, id: AggregateId) -> Result<Option<D>, StoreError> {
        self.inner
            .get(D::COLLECTION, id)
            .await?
            .map(decode)
            .transpose()
    }

    pub async fn list<D: Document>(&self) -> Result<Vec<D>, StoreError> {
        self.inner
            .list(D::COLLECTION)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    pub async fn commit(&self, changeset: Changeset) -> Result<(), StoreError> {
        if changeset.is_empty() {
            return Ok(());
        }
        self.inner.commit(changeset).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pelleterp_core::{ExpectedVersion, entity_id, impl_document};
    use serde::{Deserialize, Serialize};

    entity_id!(NoteId, "note id");

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: NoteId,
        text: String,
        #[serde(default)]
        version: u64,
    }

    impl_document!(Note, "notes");

    #[test]
    fn repeated_writes_collapse_and_keep_first_expectation() {
        let mut note = Note {
            id: NoteId::new(),
            text: "a".into(),
            version: 3,
        };
        let mut cs = Changeset::new();
        cs.put(&note).unwrap();
        note.text = "b".into();
        note.version = 9;
        cs.put(&note).unwrap();
        assert_eq!(cs.len(), 1);
        assert_eq!(cs.ops()[0].expected(), ExpectedVersion::Exact(3));

        cs.delete(&note);
        assert_eq!(cs.len(), 1);
        assert!(matches!(cs.ops()[0], WriteOp::Delete { .. }));
    }

    #[tokio::test]
    async fn typed_round_trip_sets_version() {
        let store = Store::in_memory();
        let note = Note {
            id: NoteId::new(),
            text: "hello".into(),
            version: 0,
        };
        let mut cs = Changeset::new();
        cs.put(&note).unwrap();
        store.commit(cs).await.unwrap();

        let loaded: Note = store.load(note.id.0).await.unwrap().unwrap();
        assert_eq!(loaded.text, "hello");
        assert_eq!(loaded.version, 1);

        let all: Vec<Note> = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
