use std::any::TypeId;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::core::{DbError, Persist, Result};

/// A queryable projection row type.
///
/// Implement with `#[derive(IndexModel)]`; the index name defaults to the
/// struct identifier.
pub trait IndexModel: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Name of the index this row type belongs to.
    fn index_name() -> &'static str;
}

type MapFn = Box<dyn Fn(&Value) -> Result<Vec<Value>> + Send + Sync>;
type ReduceFn = Box<dyn Fn(Vec<Value>) -> Result<Option<Value>> + Send + Sync>;
type DeleteFn = Box<dyn Fn(Value, Vec<Value>) -> Result<Option<Value>> + Send + Sync>;
type UpdateFn = Box<dyn Fn(Value, Vec<Value>) -> Result<Value> + Send + Sync>;

/// Declares how one entity type projects into one index type.
///
/// The typed builder is a construction-time convenience; at registration it
/// erases to closures over the serialized row form, which is what the commit
/// pipeline operates on.
///
/// A descriptor without `reduce` is a plain map index: rows are emitted per
/// document and removed in bulk when the document is deleted. A descriptor
/// with `reduce` must also name the group-key field with `grouped_by`.
pub struct IndexDescriptor<T, I> {
    inner: ErasedDescriptor,
    _entity: PhantomData<fn(T)>,
    _index: PhantomData<fn(I)>,
}

impl<T: Persist, I: IndexModel> IndexDescriptor<T, I> {
    /// Starts a descriptor from its map function.
    pub fn map(map: impl Fn(&T) -> Vec<I> + Send + Sync + 'static) -> Self {
        let erased: MapFn = Box::new(move |value| {
            let entity: T = serde_json::from_value(value.clone())?;
            map(&entity)
                .into_iter()
                .map(|row| Ok(serde_json::to_value(row)?))
                .collect()
        });
        Self {
            inner: ErasedDescriptor {
                entity_type: T::type_name(),
                index_type: I::index_name(),
                index_type_id: TypeId::of::<I>(),
                group_key: None,
                map: erased,
                reduce: None,
                delete: None,
                update: None,
            },
            _entity: PhantomData,
            _index: PhantomData,
        }
    }

    /// Names the index field whose value groups rows for the reduce fold.
    pub fn grouped_by(mut self, field: &'static str) -> Self {
        self.inner.group_key = Some(field);
        self
    }

    /// Folds the mapped rows of one group into a single row. The fold runs
    /// over freshly mapped rows and again to merge the persisted row with
    /// the fresh result, so it must be associative over row batches.
    pub fn reduce(mut self, reduce: impl Fn(Vec<I>) -> Option<I> + Send + Sync + 'static) -> Self {
        self.inner.reduce = Some(Box::new(move |rows| {
            encode_row(reduce(decode_rows::<I>(rows)?))
        }));
        self
    }

    /// Removes deleted rows' contribution from the current reduced row;
    /// returning `None` empties the group and drops the persisted row.
    pub fn on_delete(
        mut self,
        delete: impl Fn(I, Vec<I>) -> Option<I> + Send + Sync + 'static,
    ) -> Self {
        self.inner.delete = Some(Box::new(move |current, rows| {
            encode_row(delete(
                serde_json::from_value(current)?,
                decode_rows::<I>(rows)?,
            ))
        }));
        self
    }

    /// Applies updated rows to the current reduced row.
    pub fn on_update(mut self, update: impl Fn(I, Vec<I>) -> I + Send + Sync + 'static) -> Self {
        self.inner.update = Some(Box::new(move |current, rows| {
            Ok(serde_json::to_value(update(
                serde_json::from_value(current)?,
                decode_rows::<I>(rows)?,
            ))?)
        }));
        self
    }

    pub(crate) fn erase(self) -> ErasedDescriptor {
        self.inner
    }
}

fn decode_rows<I: IndexModel>(rows: Vec<Value>) -> Result<Vec<I>> {
    rows.into_iter()
        .map(|row| Ok(serde_json::from_value(row)?))
        .collect()
}

fn encode_row<I: IndexModel>(row: Option<I>) -> Result<Option<Value>> {
    row.map(|row| Ok(serde_json::to_value(row)?)).transpose()
}

/// Runtime form of a descriptor, operating on serialized rows.
pub(crate) struct ErasedDescriptor {
    pub(crate) entity_type: &'static str,
    pub(crate) index_type: &'static str,
    pub(crate) index_type_id: TypeId,
    group_key: Option<&'static str>,
    map: MapFn,
    reduce: Option<ReduceFn>,
    delete: Option<DeleteFn>,
    update: Option<UpdateFn>,
}

impl ErasedDescriptor {
    pub(crate) fn map_rows(&self, entity: &Value) -> Result<Vec<Value>> {
        (self.map)(entity)
    }

    pub(crate) fn has_reduce(&self) -> bool {
        self.reduce.is_some()
    }

    pub(crate) fn has_delete(&self) -> bool {
        self.delete.is_some()
    }

    /// Group-key field name; declaring a reduce without one is a
    /// configuration error surfaced at commit time.
    pub(crate) fn group_key_required(&self) -> Result<&'static str> {
        self.group_key.ok_or_else(|| {
            DbError::InvalidOperation(format!(
                "index '{}' declares a reduce but no group key",
                self.index_type
            ))
        })
    }

    /// Group-key value of a serialized row; absent fields group under null.
    pub(crate) fn group_key_of(&self, row: &Value, field: &str) -> Value {
        row.get(field).cloned().unwrap_or(Value::Null)
    }

    /// Runs the reduce fold; the fold must produce a row.
    pub(crate) fn reduce_rows(&self, rows: Vec<Value>) -> Result<Value> {
        let reduce = self.reduce.as_ref().ok_or_else(|| {
            DbError::InvalidOperation(format!("index '{}' has no reduce", self.index_type))
        })?;
        reduce(rows)?.ok_or_else(|| {
            DbError::InvalidOperation(format!(
                "reduce for index '{}' produced no row",
                self.index_type
            ))
        })
    }

    /// Runs the delete fold; `None` means the group has been emptied.
    pub(crate) fn delete_rows(&self, current: Value, rows: Vec<Value>) -> Result<Option<Value>> {
        let delete = self.delete.as_ref().ok_or_else(|| {
            DbError::InvalidOperation(format!("index '{}' has no delete fold", self.index_type))
        })?;
        delete(current, rows)
    }

    /// Runs the update fold.
    pub(crate) fn update_rows(&self, current: Value, rows: Vec<Value>) -> Result<Value> {
        let update = self.update.as_ref().ok_or_else(|| {
            DbError::InvalidOperation(format!("index '{}' has no update fold", self.index_type))
        })?;
        update(current, rows)
    }
}
