pub mod config;
pub mod memory;

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{Document, Result};

/// Transaction isolation level requested at `begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    #[default]
    Snapshot,
    Serializable,
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IsolationLevel::ReadCommitted => write!(f, "read_committed"),
            IsolationLevel::RepeatableRead => write!(f, "repeatable_read"),
            IsolationLevel::Snapshot => write!(f, "snapshot"),
            IsolationLevel::Serializable => write!(f, "serializable"),
        }
    }
}

/// Blob storage for serialized entities, keyed by document id.
#[async_trait]
pub trait DocumentStorage: Send + Sync {
    async fn load(&mut self, id: i64) -> Result<Option<Value>>;

    /// Positional bulk load; a missing id yields `None` at its position.
    async fn load_many(&mut self, ids: &[i64]) -> Result<Vec<Option<Value>>>;

    async fn save(&mut self, id: i64, blob: Value) -> Result<()>;

    async fn delete(&mut self, id: i64) -> Result<()>;
}

/// A persisted index row as returned by the backing store: the row id, the
/// serialized row data, and the back-link set of contributing document ids.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRowRecord {
    pub row_id: i64,
    pub data: Value,
    pub docs: BTreeSet<i64>,
}

/// Live connection to the backing store.
///
/// Every mutation runs inside an explicit transaction: `begin` must precede
/// it, and nested transactions are rejected. A connection is exclusively
/// owned by one session for the session's lifetime.
#[async_trait]
pub trait Connection: DocumentStorage {
    async fn begin(&mut self, isolation: IsolationLevel) -> Result<()>;

    async fn commit_transaction(&mut self) -> Result<()>;

    async fn rollback_transaction(&mut self) -> Result<()>;

    /// Inserts a document header row and returns the store-assigned id.
    async fn insert_document(&mut self, doc_type: &str) -> Result<i64>;

    async fn fetch_document(&mut self, id: i64) -> Result<Option<Document>>;

    async fn delete_document(&mut self, id: i64) -> Result<()>;

    /// Inserts an index row with its initial back-links, returning the row id.
    async fn insert_index_row(
        &mut self,
        index_type: &str,
        data: Value,
        docs: BTreeSet<i64>,
    ) -> Result<i64>;

    /// Rewrites an existing row's data and adjusts its back-links.
    async fn update_index_row(
        &mut self,
        index_type: &str,
        row_id: i64,
        data: Value,
        added: BTreeSet<i64>,
        removed: BTreeSet<i64>,
    ) -> Result<()>;

    /// Detaches `doc_id` from every row of `index_type`, dropping rows whose
    /// back-link set empties.
    async fn delete_map_rows(&mut self, index_type: &str, doc_id: i64) -> Result<()>;

    async fn delete_index_row(&mut self, index_type: &str, row_id: i64) -> Result<()>;

    /// Equality-filtered scan over persisted index rows; each filter compares
    /// a named field of the serialized row data.
    async fn fetch_index_rows(
        &mut self,
        index_type: &str,
        filters: &[(String, Value)],
    ) -> Result<Vec<IndexRowRecord>>;
}

/// Produces connections for sessions.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create_connection(&self) -> Result<Box<dyn Connection>>;

    /// Whether connections should be dropped on session close. Pooled
    /// factories return `false` and reclaim connections themselves.
    fn disposable(&self) -> bool;
}
