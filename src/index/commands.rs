use std::collections::BTreeSet;

use serde_json::Value;

use crate::connection::Connection;
use crate::core::{Document, Result};

/// A pending index mutation.
///
/// Commands are recorded in the session journal and executed against the
/// open transaction in insertion order at commit time; they are the only
/// coupling between the session and the backing store's write surface.
#[derive(Debug, Clone)]
pub enum IndexCommand {
    /// Remove a document header row.
    DeleteDocument { document: Document },

    /// Insert a fresh index row with its initial back-links.
    CreateIndex {
        index_type: &'static str,
        data: Value,
        docs: BTreeSet<i64>,
    },

    /// Rewrite an existing row and adjust its back-links.
    UpdateIndex {
        index_type: &'static str,
        row_id: i64,
        data: Value,
        added: BTreeSet<i64>,
        removed: BTreeSet<i64>,
    },

    /// Detach a document from every row of a map index.
    DeleteMapIndex {
        index_type: &'static str,
        document_id: i64,
    },

    /// Drop an emptied reduce row.
    DeleteReduceIndex {
        index_type: &'static str,
        row_id: i64,
    },
}

impl IndexCommand {
    pub(crate) async fn execute(&self, conn: &mut dyn Connection) -> Result<()> {
        match self {
            Self::DeleteDocument { document } => conn.delete_document(document.id).await,
            Self::CreateIndex {
                index_type,
                data,
                docs,
            } => conn
                .insert_index_row(index_type, data.clone(), docs.clone())
                .await
                .map(|_| ()),
            Self::UpdateIndex {
                index_type,
                row_id,
                data,
                added,
                removed,
            } => {
                conn.update_index_row(
                    index_type,
                    *row_id,
                    data.clone(),
                    added.clone(),
                    removed.clone(),
                )
                .await
            }
            Self::DeleteMapIndex {
                index_type,
                document_id,
            } => conn.delete_map_rows(index_type, *document_id).await,
            Self::DeleteReduceIndex {
                index_type,
                row_id,
            } => conn.delete_index_row(index_type, *row_id).await,
        }
    }
}
