// ============================================================================
// In-Memory Backing Store
// ============================================================================
//
// Reference backend for tests and demos. Transactions take a full snapshot
// of the committed state at `begin` and swap it back at commit; rollback
// drops the snapshot. Id allocation lives outside the snapshot so ids stay
// unique and monotonic across concurrent transactions (rolled-back ids leave
// gaps, as they would in a sequence-backed SQL store).
//
// ============================================================================

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use super::{Connection, ConnectionFactory, DocumentStorage, IndexRowRecord, IsolationLevel};
use crate::core::{DbError, Document, Result};

#[derive(Clone)]
struct StoredRow {
    data: Value,
    docs: BTreeSet<i64>,
}

#[derive(Clone, Default)]
struct StoreState {
    /// id -> simplified entity type name
    documents: BTreeMap<i64, String>,
    blobs: BTreeMap<i64, Value>,
    /// index type name -> row id -> row
    indexes: HashMap<String, BTreeMap<i64, StoredRow>>,
}

/// Shared in-memory backing store; doubles as the connection factory.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<RwLock<StoreState>>,
    next_document_id: Arc<AtomicI64>,
    next_row_id: Arc<AtomicI64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed document rows.
    pub async fn document_count(&self) -> usize {
        self.state.read().await.documents.len()
    }

    /// Committed document row, if present.
    pub async fn document(&self, id: i64) -> Option<Document> {
        self.state
            .read()
            .await
            .documents
            .get(&id)
            .map(|doc_type| Document::new(id, doc_type.clone()))
    }

    /// Committed entity blob, if present.
    pub async fn blob(&self, id: i64) -> Option<Value> {
        self.state.read().await.blobs.get(&id).cloned()
    }

    /// Committed rows of one index, in ascending row-id order.
    pub async fn index_rows(&self, index_type: &str) -> Vec<IndexRowRecord> {
        self.state
            .read()
            .await
            .indexes
            .get(index_type)
            .map(|rows| {
                rows.iter()
                    .map(|(&row_id, row)| IndexRowRecord {
                        row_id,
                        data: row.data.clone(),
                        docs: row.docs.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConnectionFactory for MemoryBackend {
    async fn create_connection(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(MemoryConnection {
            backend: self.clone(),
            tx: None,
        }))
    }

    fn disposable(&self) -> bool {
        true
    }
}

struct TxState {
    snapshot: StoreState,
    isolation: IsolationLevel,
}

/// A connection over [`MemoryBackend`]; one open transaction at a time.
pub struct MemoryConnection {
    backend: MemoryBackend,
    tx: Option<TxState>,
}

impl MemoryConnection {
    fn tx_state(&mut self) -> Result<&mut StoreState> {
        self.tx
            .as_mut()
            .map(|tx| &mut tx.snapshot)
            .ok_or_else(|| DbError::Connection("no active transaction".into()))
    }
}

#[async_trait]
impl DocumentStorage for MemoryConnection {
    async fn load(&mut self, id: i64) -> Result<Option<Value>> {
        Ok(self.tx_state()?.blobs.get(&id).cloned())
    }

    async fn load_many(&mut self, ids: &[i64]) -> Result<Vec<Option<Value>>> {
        let state = self.tx_state()?;
        Ok(ids.iter().map(|id| state.blobs.get(id).cloned()).collect())
    }

    async fn save(&mut self, id: i64, blob: Value) -> Result<()> {
        self.tx_state()?.blobs.insert(id, blob);
        Ok(())
    }

    async fn delete(&mut self, id: i64) -> Result<()> {
        self.tx_state()?
            .blobs
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| DbError::Storage(format!("blob {id} not found")))
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn begin(&mut self, isolation: IsolationLevel) -> Result<()> {
        if self.tx.is_some() {
            return Err(DbError::Connection("transaction already active".into()));
        }
        let snapshot = self.backend.state.read().await.clone();
        self.tx = Some(TxState {
            snapshot,
            isolation,
        });
        debug!(%isolation, "memory transaction opened");
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| DbError::Connection("no active transaction".into()))?;
        *self.backend.state.write().await = tx.snapshot;
        debug!(isolation = %tx.isolation, "memory transaction committed");
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> Result<()> {
        self.tx
            .take()
            .map(|_| ())
            .ok_or_else(|| DbError::Connection("no active transaction".into()))
    }

    async fn insert_document(&mut self, doc_type: &str) -> Result<i64> {
        let id = self.backend.next_document_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.tx_state()?.documents.insert(id, doc_type.to_string());
        Ok(id)
    }

    async fn fetch_document(&mut self, id: i64) -> Result<Option<Document>> {
        Ok(self
            .tx_state()?
            .documents
            .get(&id)
            .map(|doc_type| Document::new(id, doc_type.clone())))
    }

    async fn delete_document(&mut self, id: i64) -> Result<()> {
        self.tx_state()?
            .documents
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| DbError::Storage(format!("document {id} not found")))
    }

    async fn insert_index_row(
        &mut self,
        index_type: &str,
        data: Value,
        docs: BTreeSet<i64>,
    ) -> Result<i64> {
        let row_id = self.backend.next_row_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.tx_state()?
            .indexes
            .entry(index_type.to_string())
            .or_default()
            .insert(row_id, StoredRow { data, docs });
        Ok(row_id)
    }

    async fn update_index_row(
        &mut self,
        index_type: &str,
        row_id: i64,
        data: Value,
        added: BTreeSet<i64>,
        removed: BTreeSet<i64>,
    ) -> Result<()> {
        let row = self
            .tx_state()?
            .indexes
            .get_mut(index_type)
            .and_then(|rows| rows.get_mut(&row_id))
            .ok_or_else(|| {
                DbError::Storage(format!("index row {row_id} not found in '{index_type}'"))
            })?;
        row.data = data;
        row.docs.extend(added);
        for doc_id in &removed {
            row.docs.remove(doc_id);
        }
        Ok(())
    }

    async fn delete_map_rows(&mut self, index_type: &str, doc_id: i64) -> Result<()> {
        if let Some(rows) = self.tx_state()?.indexes.get_mut(index_type) {
            for row in rows.values_mut() {
                row.docs.remove(&doc_id);
            }
            rows.retain(|_, row| !row.docs.is_empty());
        }
        Ok(())
    }

    async fn delete_index_row(&mut self, index_type: &str, row_id: i64) -> Result<()> {
        self.tx_state()?
            .indexes
            .get_mut(index_type)
            .and_then(|rows| rows.remove(&row_id))
            .map(|_| ())
            .ok_or_else(|| {
                DbError::Storage(format!("index row {row_id} not found in '{index_type}'"))
            })
    }

    async fn fetch_index_rows(
        &mut self,
        index_type: &str,
        filters: &[(String, Value)],
    ) -> Result<Vec<IndexRowRecord>> {
        let state = self.tx_state()?;
        let Some(rows) = state.indexes.get(index_type) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter(|(_, row)| {
                filters
                    .iter()
                    .all(|(field, value)| row.data.get(field) == Some(value))
            })
            .map(|(&row_id, row)| IndexRowRecord {
                row_id,
                data: row.data.clone(),
                docs: row.docs.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn open_connection(backend: &MemoryBackend) -> Box<dyn Connection> {
        let mut conn = backend.create_connection().await.unwrap();
        conn.begin(IsolationLevel::Snapshot).await.unwrap();
        conn
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let backend = MemoryBackend::new();
        let mut conn = open_connection(&backend).await;

        let id = conn.insert_document("Person").await.unwrap();
        conn.save(id, json!({"name": "a"})).await.unwrap();
        assert_eq!(backend.document_count().await, 0);

        conn.commit_transaction().await.unwrap();
        assert_eq!(backend.document_count().await, 1);
        assert_eq!(backend.blob(id).await.unwrap()["name"], "a");
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let backend = MemoryBackend::new();
        let mut conn = open_connection(&backend).await;

        let id = conn.insert_document("Person").await.unwrap();
        conn.save(id, json!({"name": "a"})).await.unwrap();
        conn.rollback_transaction().await.unwrap();

        assert_eq!(backend.document_count().await, 0);
        assert!(backend.blob(id).await.is_none());
    }

    #[tokio::test]
    async fn test_nested_begin_rejected() {
        let backend = MemoryBackend::new();
        let mut conn = open_connection(&backend).await;
        assert!(conn.begin(IsolationLevel::Snapshot).await.is_err());
    }

    #[tokio::test]
    async fn test_operations_require_transaction() {
        let backend = MemoryBackend::new();
        let mut conn = backend.create_connection().await.unwrap();
        assert!(conn.insert_document("Person").await.is_err());
        assert!(conn.load(1).await.is_err());
        assert!(conn.commit_transaction().await.is_err());
    }

    #[tokio::test]
    async fn test_document_ids_stay_unique_after_rollback() {
        let backend = MemoryBackend::new();

        let mut conn = open_connection(&backend).await;
        let first = conn.insert_document("Person").await.unwrap();
        conn.rollback_transaction().await.unwrap();

        let mut conn = open_connection(&backend).await;
        let second = conn.insert_document("Person").await.unwrap();
        conn.commit_transaction().await.unwrap();

        assert!(second > first);
    }

    #[tokio::test]
    async fn test_load_many_is_positional() {
        let backend = MemoryBackend::new();
        let mut conn = open_connection(&backend).await;

        conn.save(1, json!({"n": 1})).await.unwrap();
        conn.save(3, json!({"n": 3})).await.unwrap();

        let blobs = conn.load_many(&[3, 2, 1]).await.unwrap();
        assert_eq!(blobs[0].as_ref().unwrap()["n"], 3);
        assert!(blobs[1].is_none());
        assert_eq!(blobs[2].as_ref().unwrap()["n"], 1);
    }

    #[tokio::test]
    async fn test_delete_map_rows_drops_emptied_rows() {
        let backend = MemoryBackend::new();
        let mut conn = open_connection(&backend).await;

        let shared = conn
            .insert_index_row("ByName", json!({"name": "a"}), BTreeSet::from([1, 2]))
            .await
            .unwrap();
        let lone = conn
            .insert_index_row("ByName", json!({"name": "b"}), BTreeSet::from([1]))
            .await
            .unwrap();

        conn.delete_map_rows("ByName", 1).await.unwrap();
        conn.commit_transaction().await.unwrap();

        let rows = backend.index_rows("ByName").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row_id, shared);
        assert_eq!(rows[0].docs, BTreeSet::from([2]));
        assert!(rows.iter().all(|row| row.row_id != lone));
    }

    #[tokio::test]
    async fn test_fetch_index_rows_filters_by_field() {
        let backend = MemoryBackend::new();
        let mut conn = open_connection(&backend).await;

        conn.insert_index_row("ByName", json!({"name": "a", "count": 1}), BTreeSet::new())
            .await
            .unwrap();
        conn.insert_index_row("ByName", json!({"name": "b", "count": 2}), BTreeSet::new())
            .await
            .unwrap();

        let rows = conn
            .fetch_index_rows("ByName", &[("name".to_string(), json!("b"))])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data["count"], 2);
    }
}
