// ============================================================================
// Unit-of-Work Session
// ============================================================================
//
// Batches pending saves and deletes, keeps loaded entities identity-mapped,
// folds index projections incrementally, and drains the resulting command
// journal into one transaction.
//
// Commit order: tracked entities (diffed, ascending id) -> queued saves ->
// queued deletes -> reduce finalization -> journal drain. Document inserts
// execute inline because the assigned id is needed before mapping.
//
// ============================================================================

pub(crate) mod identity;
pub(crate) mod journal;
pub(crate) mod reduce;
pub(crate) mod tracker;

use std::any::TypeId;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionFactory, DocumentStorage, IsolationLevel};
use crate::core::{DbError, Document, EntityRef, Persist, Result, Tracked};
use crate::index::{DescriptorRegistry, IndexCommand, IndexModel};
use crate::query::IndexQuery;

use identity::IdentityMap;
use journal::CommandJournal;
use reduce::{MapRow, MapState, MapStateKind, ReducePipeline};
use tracker::ChangeTracker;

/// Unit-of-work session over a document store.
///
/// A session is owned by one logical task and is not safe for concurrent
/// use. All database work runs in one lazily opened transaction; [`close`]
/// commits it, or rolls back if [`cancel`] was called first.
///
/// [`close`]: DocumentSession::close
/// [`cancel`]: DocumentSession::cancel
pub struct DocumentSession {
    factory: Arc<dyn ConnectionFactory>,
    registry: Arc<DescriptorRegistry>,
    connection: Option<Box<dyn Connection>>,
    transaction_open: bool,
    isolation: IsolationLevel,
    identity: IdentityMap,
    tracker: ChangeTracker,
    journal: CommandJournal,
    pipeline: ReducePipeline,
    canceled: bool,
}

impl DocumentSession {
    pub(crate) fn new(
        factory: Arc<dyn ConnectionFactory>,
        registry: Arc<DescriptorRegistry>,
        isolation: IsolationLevel,
    ) -> Self {
        Self {
            factory,
            registry,
            connection: None,
            transaction_open: false,
            isolation,
            identity: IdentityMap::default(),
            tracker: ChangeTracker::default(),
            journal: CommandJournal::default(),
            pipeline: ReducePipeline::default(),
            canceled: false,
        }
    }

    /// Queues an entity for persistence at commit time.
    ///
    /// Saving an entity the session already tracks is a no-op: the commit
    /// diff pass decides whether it actually changed. Types registered as
    /// index rows are not entities and are rejected.
    pub fn save<T: Persist>(&mut self, entity: &Tracked<T>) -> Result<()> {
        if self.registry.is_index_type(TypeId::of::<T>()) {
            return Err(DbError::InvalidArgument(format!(
                "cannot save index type '{}' as an entity",
                T::type_name()
            )));
        }
        let entity = entity.erase();
        if self.identity.has(&entity) {
            return Ok(());
        }
        self.tracker.queue_save(entity);
        Ok(())
    }

    /// Queues an entity for deletion at commit time.
    pub fn delete<T: Persist>(&mut self, entity: &Tracked<T>) -> Result<()> {
        self.tracker.queue_delete(entity.erase());
        Ok(())
    }

    /// Fetches entities by id, positionally; duplicate ids yield the same
    /// handle. Ids already tracked return the cached handle; the rest are
    /// bulk-loaded, given their id, and entered into the identity map.
    pub async fn get<T: Persist>(&mut self, ids: &[i64]) -> Result<Vec<Tracked<T>>> {
        self.open_transaction().await?;

        let mut missing: Vec<i64> = Vec::new();
        for &id in ids {
            if self.identity.get(id).is_none() && !missing.contains(&id) {
                missing.push(id);
            }
        }

        if !missing.is_empty() {
            let conn = self.connection()?;
            let blobs = conn.load_many(&missing).await?;
            for (&id, blob) in missing.iter().zip(blobs) {
                let blob =
                    blob.ok_or_else(|| DbError::Storage(format!("document {id} not found")))?;
                let mut entity: T = serde_json::from_value(blob)?;
                entity.set_id(id);
                let tracked = Tracked::new(entity);
                self.identity.insert(id, tracked.erase());
            }
        }

        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            let entity = self
                .identity
                .get(id)
                .ok_or_else(|| DbError::Storage(format!("document {id} not found")))?;
            let tracked = Tracked::<T>::from_erased(entity).ok_or_else(|| {
                DbError::InvalidOperation(format!("document {id} is tracked as a different type"))
            })?;
            out.push(tracked);
        }
        Ok(out)
    }

    /// Flushes pending work into the open transaction, then returns a query
    /// handle over one index, bound to the live connection. Session-local
    /// writes are therefore always visible to the query.
    pub async fn query<I: IndexModel>(&mut self) -> Result<IndexQuery<'_, I>> {
        self.commit().await?;
        let conn = self.connection()?;
        Ok(IndexQuery::new(conn.as_mut()))
    }

    /// Sets the isolation level for the transaction this session will open.
    /// Rejected once the transaction is live; the level of an open
    /// transaction cannot be re-issued.
    pub fn set_isolation_level(&mut self, isolation: IsolationLevel) -> Result<()> {
        if self.transaction_open {
            return Err(DbError::InvalidOperation(
                "isolation level cannot change once the transaction is open".into(),
            ));
        }
        self.isolation = isolation;
        Ok(())
    }

    /// Marks the session for rollback at [`close`]. Idempotent; operations
    /// after `cancel` stay legal, only the final disposition changes.
    ///
    /// [`close`]: DocumentSession::close
    pub fn cancel(&mut self) {
        self.canceled = true;
    }

    /// Runs all pending work (diffed tracked entities, queued saves, queued
    /// deletes, reduce finalization) and drains the journal into the open
    /// transaction. The transaction itself stays open until [`close`].
    ///
    /// [`close`]: DocumentSession::close
    pub async fn commit(&mut self) -> Result<()> {
        self.open_transaction().await?;

        let mut inserted = 0usize;
        let mut updated = 0usize;
        let mut deleted = 0usize;

        // Tracked entities first; those also queued for delete are left to
        // the delete pass.
        for (id, entity) in self.identity.entries() {
            if self.tracker.is_delete_pending(&entity) {
                continue;
            }
            if self.persist_tracked(id, &entity).await? {
                updated += 1;
            }
        }

        for entity in self.tracker.take_saves() {
            if self.identity.has(&entity) {
                continue;
            }
            self.persist_new(&entity).await?;
            inserted += 1;
        }

        for entity in self.tracker.take_deletes() {
            if self.persist_delete(&entity).await? {
                deleted += 1;
            }
        }

        let conn = self
            .connection
            .as_mut()
            .ok_or_else(|| DbError::Connection("session connection not open".into()))?;
        self.pipeline
            .finalize(conn.as_mut(), &mut self.journal)
            .await?;
        let drained = self.journal.drain(conn.as_mut()).await?;

        info!(inserted, updated, deleted, commands = drained, "session commit flushed");
        Ok(())
    }

    /// Finishes the session: commits pending work and the transaction, or
    /// rolls back if [`cancel`] was called. The connection is dropped when
    /// the factory reports its connections disposable; pooled factories
    /// reclaim theirs through the connection's own drop.
    ///
    /// [`cancel`]: DocumentSession::cancel
    pub async fn close(mut self) -> Result<()> {
        if self.canceled {
            if self.transaction_open {
                self.connection()?.rollback_transaction().await?;
                self.transaction_open = false;
                warn!("session canceled, transaction rolled back");
            }
        } else {
            self.commit().await?;
            self.connection()?.commit_transaction().await?;
            self.transaction_open = false;
        }

        if let Some(connection) = self.connection.take() {
            if !self.factory.disposable() {
                debug!("pooled connection returns to its factory on drop");
            }
            drop(connection);
        }
        Ok(())
    }

    /// Number of entities the session currently tracks.
    pub fn tracked_count(&self) -> usize {
        self.identity.len()
    }

    async fn open_transaction(&mut self) -> Result<()> {
        if self.connection.is_none() {
            self.connection = Some(self.factory.create_connection().await?);
        }
        if !self.transaction_open {
            let isolation = self.isolation;
            self.connection()?.begin(isolation).await?;
            self.transaction_open = true;
            debug!(%isolation, "session transaction opened");
        }
        Ok(())
    }

    fn connection(&mut self) -> Result<&mut Box<dyn Connection>> {
        self.connection
            .as_mut()
            .ok_or_else(|| DbError::Connection("session connection not open".into()))
    }

    /// Diffs one tracked entity against its stored blob; returns whether an
    /// update was written.
    async fn persist_tracked(&mut self, id: i64, entity: &EntityRef) -> Result<bool> {
        let new_value = entity.to_value()?;

        let conn = self.connection()?;
        let old_value = conn.load(id).await?;
        let document = conn.fetch_document(id).await?.ok_or_else(|| {
            DbError::Storage(format!("document row {id} missing for tracked entity"))
        })?;

        if old_value.as_ref() == Some(&new_value) {
            return Ok(false);
        }

        if let Some(old_value) = old_value {
            self.map_deleted(&document, &old_value)?;
        }
        self.map_new(&document, &new_value)?;
        self.connection()?.save(id, new_value).await?;
        Ok(true)
    }

    /// Inserts a new document: the header row executes inline so the id is
    /// known, then the blob is stored and the entity joins the identity map.
    async fn persist_new(&mut self, entity: &EntityRef) -> Result<()> {
        let doc_type = entity.type_name();

        let conn = self.connection()?;
        let id = conn.insert_document(doc_type).await?;
        entity.write_id(id)?;

        let value = entity.to_value()?;
        self.connection()?.save(id, value.clone()).await?;
        self.identity.insert(id, entity.clone());

        let document = Document::new(id, doc_type);
        self.map_new(&document, &value)?;
        Ok(())
    }

    /// Deletes one entity's document, blob, and index contributions; returns
    /// whether a document row existed.
    async fn persist_delete(&mut self, entity: &EntityRef) -> Result<bool> {
        let id = match self.identity.id_of(entity) {
            Some(id) => id,
            None => {
                let id = entity.entity_id()?;
                if id == 0 {
                    return Err(DbError::InvalidOperation(format!(
                        "cannot delete '{}' without an assigned id",
                        entity.type_name()
                    )));
                }
                id
            }
        };

        let conn = self.connection()?;
        let Some(document) = conn.fetch_document(id).await? else {
            return Ok(false);
        };

        let value = entity.to_value()?;
        self.connection()?.delete(id).await?;
        self.journal.append(IndexCommand::DeleteDocument {
            document: document.clone(),
        });
        self.identity.remove(id);
        self.map_deleted(&document, &value)?;
        Ok(true)
    }

    /// Maps one document's entity value into index rows: pure map rows go to
    /// the journal at once, reduce rows accumulate for finalization.
    fn map_new(&mut self, document: &Document, entity: &Value) -> Result<()> {
        for descriptor in self.registry.descriptors_for(&document.doc_type) {
            for data in descriptor.map_rows(entity)? {
                let mut row = MapRow::new(data);
                row.added.insert(document.id);
                if descriptor.has_reduce() {
                    self.pipeline.record(
                        descriptor,
                        MapState {
                            row,
                            kind: MapStateKind::New,
                        },
                    );
                } else {
                    self.journal.append(IndexCommand::CreateIndex {
                        index_type: descriptor.index_type,
                        data: row.data,
                        docs: row.added,
                    });
                }
            }
        }
        Ok(())
    }

    /// Unmaps a document: descriptors that cannot fold deletions drop every
    /// row keyed by the document; the rest re-map the old value and
    /// accumulate delete states for finalization.
    fn map_deleted(&mut self, document: &Document, entity: &Value) -> Result<()> {
        for descriptor in self.registry.descriptors_for(&document.doc_type) {
            if !descriptor.has_reduce() || !descriptor.has_delete() {
                self.journal.append(IndexCommand::DeleteMapIndex {
                    index_type: descriptor.index_type,
                    document_id: document.id,
                });
                continue;
            }
            for data in descriptor.map_rows(entity)? {
                let mut row = MapRow::new(data);
                row.removed.insert(document.id);
                self.pipeline.record(
                    descriptor,
                    MapState {
                        row,
                        kind: MapStateKind::Delete,
                    },
                );
            }
        }
        Ok(())
    }
}
