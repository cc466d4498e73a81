use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use pelleterp_core::AggregateId;

use super::{Changeset, DocumentStore, StoreError, StoredDocument, WriteOp};

type Key = (String, AggregateId);

/// In-memory document store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    inner: RwLock<BTreeMap<Key, (u64, JsonValue)>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(
        &self,
        collection: &str,
        id: AggregateId,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map
            .get(&(collection.to_string(), id))
            .map(|(version, body)| StoredDocument {
                collection: collection.to_string(),
                id,
                version: *version,
                body: body.clone(),
            }))
    }

    async fn list(&self, collection: &str) -> Result<Vec<StoredDocument>, StoreError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map
            .iter()
            .filter(|((c, _), _)| c == collection)
            .map(|((c, id), (version, body))| StoredDocument {
                collection: c.clone(),
                id: *id,
                version: *version,
                body: body.clone(),
            })
            .collect())
    }

    async fn commit(&self, changeset: Changeset) -> Result<(), StoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;

        for op in changeset.ops() {
            let current = map
                .get(&(op.collection().to_string(), op.id()))
                .map(|(v, _)| *v)
                .unwrap_or(0);
            if !op.expected().matches(current) {
                return Err(StoreError::Conflict(format!(
                    "{} {} is at version {current}, expected {:?}",
                    op.collection(),
                    op.id(),
                    op.expected()
                )));
            }
        }

        for op in changeset.into_ops() {
            match op {
                WriteOp::Put {
                    collection, id, body, ..
                } => {
                    let key = (collection.to_string(), id);
                    let next = map.get(&key).map(|(v, _)| *v).unwrap_or(0) + 1;
                    map.insert(key, (next, body));
                }
                WriteOp::Delete { collection, id, .. } => {
                    map.remove(&(collection.to_string(), id));
                }
            }
        }
        Ok(())
    }
}
