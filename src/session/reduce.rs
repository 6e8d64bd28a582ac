// ============================================================================
// Map/Reduce Pipeline
// ============================================================================
//
// Accumulates per-descriptor map deltas during a session and folds them per
// group key at commit time. Finalization, per group:
//
//   fresh     = reduce(new rows)                    when any
//   persisted = first stored row where group == key
//   current   = reduce([persisted, fresh]) | persisted | fresh
//   current   = delete(current, deleted rows)       may empty the group
//   current   = update(current, updated rows)
//
// then one command is emitted: delete the stored row if the group emptied,
// update it if it survived, create it if the group is new.
//
// ============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;

use super::journal::CommandJournal;
use crate::connection::Connection;
use crate::core::Result;
use crate::index::descriptor::ErasedDescriptor;
use crate::index::IndexCommand;

/// Lifecycle of an accumulated map row awaiting finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MapStateKind {
    New,
    Update,
    Delete,
}

/// A mapped index row plus its back-link deltas.
#[derive(Debug, Clone)]
pub(crate) struct MapRow {
    pub data: Value,
    pub added: BTreeSet<i64>,
    pub removed: BTreeSet<i64>,
}

impl MapRow {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MapState {
    pub row: MapRow,
    pub kind: MapStateKind,
}

/// Per-descriptor accumulation of map deltas, in first-use order.
#[derive(Default)]
pub(crate) struct ReducePipeline {
    accumulated: Vec<(Arc<ErasedDescriptor>, Vec<MapState>)>,
}

impl ReducePipeline {
    pub fn record(&mut self, descriptor: &Arc<ErasedDescriptor>, state: MapState) {
        match self
            .accumulated
            .iter_mut()
            .find(|(known, _)| Arc::ptr_eq(known, descriptor))
        {
            Some((_, states)) => states.push(state),
            None => self.accumulated.push((descriptor.clone(), vec![state])),
        }
    }

    /// Folds every accumulated group and appends the resulting commands to
    /// the journal, descriptor by descriptor, group keys in first-seen order.
    pub async fn finalize(
        &mut self,
        conn: &mut dyn Connection,
        journal: &mut CommandJournal,
    ) -> Result<()> {
        for (descriptor, states) in std::mem::take(&mut self.accumulated) {
            finalize_descriptor(&descriptor, &states, conn, journal).await?;
        }
        Ok(())
    }
}

async fn finalize_descriptor(
    descriptor: &ErasedDescriptor,
    states: &[MapState],
    conn: &mut dyn Connection,
    journal: &mut CommandJournal,
) -> Result<()> {
    let group_field = descriptor.group_key_required()?;

    let mut keys: Vec<Value> = Vec::new();
    for state in states {
        let key = descriptor.group_key_of(&state.row.data, group_field);
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    for key in keys {
        let mut new_group: Vec<&MapRow> = Vec::new();
        let mut delete_group: Vec<&MapRow> = Vec::new();
        let mut update_group: Vec<&MapRow> = Vec::new();
        for state in states {
            if descriptor.group_key_of(&state.row.data, group_field) != key {
                continue;
            }
            match state.kind {
                MapStateKind::New => new_group.push(&state.row),
                MapStateKind::Update => update_group.push(&state.row),
                MapStateKind::Delete => delete_group.push(&state.row),
            }
        }

        let fresh = if new_group.is_empty() {
            None
        } else {
            Some(descriptor.reduce_rows(row_data(&new_group))?)
        };

        let persisted = conn
            .fetch_index_rows(
                descriptor.index_type,
                &[(group_field.to_string(), key.clone())],
            )
            .await?
            .into_iter()
            .next();

        let mut current = match (&persisted, fresh) {
            (Some(row), Some(fresh)) => {
                Some(descriptor.reduce_rows(vec![row.data.clone(), fresh])?)
            }
            (Some(row), None) => Some(row.data.clone()),
            (None, fresh) => fresh,
        };

        if !delete_group.is_empty() {
            current = match current {
                Some(value) => descriptor.delete_rows(value, row_data(&delete_group))?,
                None => None,
            };
        }

        if !update_group.is_empty() {
            current = match current {
                Some(value) => Some(descriptor.update_rows(value, row_data(&update_group))?),
                None => None,
            };
        }

        let added: BTreeSet<i64> = new_group
            .iter()
            .flat_map(|row| row.added.iter().copied())
            .collect();
        let removed: BTreeSet<i64> = delete_group
            .iter()
            .flat_map(|row| row.removed.iter().copied())
            .collect();

        match (persisted, current) {
            (Some(row), None) => journal.append(IndexCommand::DeleteReduceIndex {
                index_type: descriptor.index_type,
                row_id: row.row_id,
            }),
            (Some(row), Some(data)) => journal.append(IndexCommand::UpdateIndex {
                index_type: descriptor.index_type,
                row_id: row.row_id,
                data,
                added,
                removed,
            }),
            (None, Some(data)) => journal.append(IndexCommand::CreateIndex {
                index_type: descriptor.index_type,
                data,
                docs: added,
            }),
            (None, None) => {}
        }
    }

    Ok(())
}

fn row_data(rows: &[&MapRow]) -> Vec<Value> {
    rows.iter().map(|row| row.data.clone()).collect()
}
