//! Postgres-backed document store.
//!
//! One `documents` table keyed by `(collection, id)` with a JSONB body and a
//! version column. A changeset is committed in a single transaction: each
//! touched row is locked (`FOR UPDATE`), its version compared with the
//! expectation, then written. A concurrent insert of the same new record
//! surfaces as a unique violation and is reported as a conflict.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{Span, instrument};

use pelleterp_core::AggregateId;

use super::{Changeset, DocumentStore, StoreError, StoredDocument, WriteOp};

const SCHEMA: &str = include_str!("../../migrations/0001_documents.sql");

#[derive(Debug, Clone)]
pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the schema exists.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    #[instrument(skip(self), err)]
    async fn get(
        &self,
        collection: &str,
        id: AggregateId,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT collection, id, version, body
            FROM documents
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(collection)
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.map(|r| to_document(&r)).transpose()
    }

    #[instrument(skip(self), fields(count = tracing::field::Empty), err)]
    async fn list(&self, collection: &str) -> Result<Vec<StoredDocument>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT collection, id, version, body
            FROM documents
            WHERE collection = $1
            ORDER BY id ASC
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e))?;

        Span::current().record("count", rows.len());
        rows.iter().map(to_document).collect()
    }

    #[instrument(skip(self, changeset), fields(ops = changeset.len()), err)]
    async fn commit(&self, changeset: Changeset) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for op in changeset.into_ops() {
            let current = current_version(&mut tx, op.collection(), op.id()).await?;
            if !op.expected().matches(current) {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(StoreError::Conflict(format!(
                    "{} {} is at version {current}, expected {:?}",
                    op.collection(),
                    op.id(),
                    op.expected()
                )));
            }

            match op {
                WriteOp::Put {
                    collection, id, body, ..
                } => {
                    // A plain insert for absent records: a concurrent insert
                    // of the same key fails on the primary key (23505).
                    let sql = if current == 0 {
                        r#"
                        INSERT INTO documents (collection, id, version, body)
                        VALUES ($1, $2, $3, $4)
                        "#
                    } else {
                        r#"
                        UPDATE documents
                        SET version = $3, body = $4, updated_at = NOW()
                        WHERE collection = $1 AND id = $2
                        "#
                    };
                    sqlx::query(sql)
                        .bind(collection)
                        .bind(id.as_uuid())
                        .bind((current + 1) as i64)
                        .bind(&body)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| map_sqlx_error("put", e))?;
                }
                WriteOp::Delete { collection, id, .. } => {
                    sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
                        .bind(collection)
                        .bind(id.as_uuid())
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| map_sqlx_error("delete", e))?;
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }
}

async fn current_version(
    tx: &mut Transaction<'_, Postgres>,
    collection: &str,
    id: AggregateId,
) -> Result<u64, StoreError> {
    let row = sqlx::query(
        "SELECT version FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE",
    )
    .bind(collection)
    .bind(id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("current_version", e))?;

    match row {
        Some(row) => {
            let version: i64 = row
                .try_get("version")
                .map_err(|e| map_sqlx_error("current_version", e))?;
            Ok(version as u64)
        }
        None => Ok(0),
    }
}

fn to_document(row: &PgRow) -> Result<StoredDocument, StoreError> {
    let read = |e| map_sqlx_error("decode_row", e);
    let id: uuid::Uuid = row.try_get("id").map_err(read)?;
    let version: i64 = row.try_get("version").map_err(read)?;
    Ok(StoredDocument {
        collection: row.try_get("collection").map_err(read)?,
        id: AggregateId::from_uuid(id),
        version: version as u64,
        body: row.try_get("body").map_err(read)?,
    })
}

/// Map SQLx errors to [`StoreError`]; unique violations are conflicts.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}
