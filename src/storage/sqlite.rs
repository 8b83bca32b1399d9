//! SQLite storage implementation.
//!
//! Each document is serialized to JSON and stored in a single text column;
//! the key columns alongside it exist for lookups and ordering.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use super::{RunRecord, Storage, StorageError, StoredNode, StoredWorkflow};
use crate::core::types::{NodeId, RunId};

/// SQLite storage backend.
///
/// Provides persistent storage with automatic schema migration.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) the database at `path` and run migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StorageError::Other(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn duplicate_or_other(e: sqlx::Error, what: String) -> StorageError {
    match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::DuplicateKey(what),
        other => StorageError::Other(other.to_string()),
    }
}

fn decode_docs<T: serde::de::DeserializeOwned>(rows: Vec<(String,)>) -> Result<Vec<T>, StorageError> {
    rows.into_iter()
        .map(|(doc,)| serde_json::from_str(&doc).map_err(StorageError::from))
        .collect()
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn reset(&self) -> Result<(), StorageError> {
        sqlx::raw_sql("DELETE FROM run_records; DELETE FROM nodes; DELETE FROM workflows;")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(())
    }

    async fn save_workflow(&self, workflow: StoredWorkflow) -> Result<(), StorageError> {
        let doc = serde_json::to_string(&workflow)?;
        sqlx::query(
            "INSERT INTO workflows (run_id, workflow_id, created_at, doc) VALUES (?, ?, ?, ?)",
        )
        .bind(workflow.run_id.to_string())
        .bind(workflow.workflow_id.as_str())
        .bind(workflow.created_at.to_rfc3339())
        .bind(&doc)
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_or_other(e, format!("workflow: {}", workflow.run_id)))?;
        Ok(())
    }

    async fn get_workflow(&self, run_id: &RunId) -> Result<StoredWorkflow, StorageError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT doc FROM workflows WHERE run_id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let (doc,) = row.ok_or_else(|| StorageError::NotFound(format!("workflow: {}", run_id)))?;
        Ok(serde_json::from_str(&doc)?)
    }

    async fn list_workflows(&self) -> Result<Vec<StoredWorkflow>, StorageError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT doc FROM workflows ORDER BY created_at ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::Other(e.to_string()))?;
        decode_docs(rows)
    }

    async fn update_workflow(&self, workflow: StoredWorkflow) -> Result<(), StorageError> {
        let doc = serde_json::to_string(&workflow)?;
        let result = sqlx::query("UPDATE workflows SET doc = ? WHERE run_id = ?")
            .bind(&doc)
            .bind(workflow.run_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "workflow: {}",
                workflow.run_id
            )));
        }
        Ok(())
    }

    async fn save_node(&self, node: StoredNode) -> Result<(), StorageError> {
        let doc = serde_json::to_string(&node)?;
        sqlx::query("INSERT INTO nodes (run_id, node_id, idx, doc) VALUES (?, ?, ?, ?)")
            .bind(node.run_id.to_string())
            .bind(node.node_id.as_str())
            .bind(node.index as i64)
            .bind(&doc)
            .execute(&self.pool)
            .await
            .map_err(|e| duplicate_or_other(e, format!("node: {}/{}", node.run_id, node.node_id)))?;
        Ok(())
    }

    async fn get_node(&self, run_id: &RunId, node_id: &NodeId) -> Result<StoredNode, StorageError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT doc FROM nodes WHERE run_id = ? AND node_id = ?")
                .bind(run_id.to_string())
                .bind(node_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Other(e.to_string()))?;

        let (doc,) =
            row.ok_or_else(|| StorageError::NotFound(format!("node: {}/{}", run_id, node_id)))?;
        Ok(serde_json::from_str(&doc)?)
    }

    async fn update_node(&self, node: StoredNode) -> Result<(), StorageError> {
        let doc = serde_json::to_string(&node)?;
        let result = sqlx::query("UPDATE nodes SET doc = ? WHERE run_id = ? AND node_id = ?")
            .bind(&doc)
            .bind(node.run_id.to_string())
            .bind(node.node_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "node: {}/{}",
                node.run_id, node.node_id
            )));
        }
        Ok(())
    }

    async fn list_nodes(&self, run_id: &RunId) -> Result<Vec<StoredNode>, StorageError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT doc FROM nodes WHERE run_id = ? ORDER BY idx ASC")
                .bind(run_id.to_string())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::Other(e.to_string()))?;
        decode_docs(rows)
    }

    async fn append_run_record(&self, record: RunRecord) -> Result<(), StorageError> {
        let doc = serde_json::to_string(&record)?;
        sqlx::query("INSERT INTO run_records (run_id, sequence, node_id, doc) VALUES (?, ?, ?, ?)")
            .bind(record.run_id.to_string())
            .bind(record.sequence as i64)
            .bind(record.node_id.as_str())
            .bind(&doc)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                duplicate_or_other(
                    e,
                    format!("run record: {}/{}", record.run_id, record.sequence),
                )
            })?;
        Ok(())
    }

    async fn list_run_records(&self, run_id: &RunId) -> Result<Vec<RunRecord>, StorageError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT doc FROM run_records WHERE run_id = ? ORDER BY sequence ASC")
                .bind(run_id.to_string())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::Other(e.to_string()))?;
        decode_docs(rows)
    }

    async fn last_run(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
    ) -> Result<Option<RunRecord>, StorageError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT doc FROM run_records WHERE run_id = ? AND node_id = ? ORDER BY sequence DESC LIMIT 1",
        )
        .bind(run_id.to_string())
        .bind(node_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        row.map(|(doc,)| serde_json::from_str(&doc).map_err(StorageError::from))
            .transpose()
    }
}
