use std::any::Any;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::error::{DbError, Result};

/// A persistable application object.
///
/// `id() == 0` means the entity has not been assigned a document id yet; the
/// session writes the assigned id back through `set_id` on first insert.
/// Implement with `#[derive(Persist)]`, which wires the trait to an `i64` id
/// field (`id` by name, or the field marked `#[persist(id)]`).
pub trait Persist: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Simplified type name recorded on the document row.
    fn type_name() -> &'static str;

    fn id(&self) -> i64;

    fn set_id(&mut self, id: i64);
}

/// Shared handle to an entity tracked by a session.
///
/// Cloning is cheap; clones refer to the same underlying object, so a handle
/// fetched twice from one session compares equal by [`Tracked::ptr_eq`].
pub struct Tracked<T> {
    cell: Arc<RwLock<T>>,
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: Persist> Tracked<T> {
    pub fn new(entity: T) -> Self {
        Self {
            cell: Arc::new(RwLock::new(entity)),
        }
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, T>> {
        self.cell.read().map_err(DbError::from)
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, T>> {
        self.cell.write().map_err(DbError::from)
    }

    /// Whether two handles refer to the same tracked object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    pub(crate) fn erase(&self) -> EntityRef {
        EntityRef {
            cell: self.cell.clone() as Arc<dyn Any + Send + Sync>,
            ops: EntityOps::of::<T>(),
        }
    }

    pub(crate) fn from_erased(entity: &EntityRef) -> Option<Self> {
        entity
            .cell
            .clone()
            .downcast::<RwLock<T>>()
            .ok()
            .map(|cell| Self { cell })
    }
}

/// Type-erased operations over one entity type, monomorphized by
/// [`EntityOps::of`]. Plain function pointers, so the table is `Copy`.
#[derive(Clone, Copy)]
pub struct EntityOps {
    type_name: &'static str,
    to_value: fn(&(dyn Any + Send + Sync)) -> Result<Value>,
    get_id: fn(&(dyn Any + Send + Sync)) -> Result<i64>,
    set_id: fn(&(dyn Any + Send + Sync), i64) -> Result<()>,
}

impl EntityOps {
    pub fn of<T: Persist>() -> Self {
        Self {
            type_name: T::type_name(),
            to_value: erased::to_value::<T>,
            get_id: erased::get_id::<T>,
            set_id: erased::set_id::<T>,
        }
    }
}

/// An entity as the session internals carry it: the shared cell plus its
/// erased operation table. Identity is the address of the cell.
#[derive(Clone)]
pub struct EntityRef {
    cell: Arc<dyn Any + Send + Sync>,
    ops: EntityOps,
}

impl EntityRef {
    pub fn type_name(&self) -> &'static str {
        self.ops.type_name
    }

    /// Stable address of the underlying cell; the identity-map key.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.cell) as *const () as usize
    }

    pub fn same_entity(&self, other: &EntityRef) -> bool {
        self.addr() == other.addr()
    }

    /// Canonical serialized form of the current entity state.
    pub fn to_value(&self) -> Result<Value> {
        (self.ops.to_value)(self.cell.as_ref())
    }

    pub fn entity_id(&self) -> Result<i64> {
        (self.ops.get_id)(self.cell.as_ref())
    }

    pub fn write_id(&self, id: i64) -> Result<()> {
        (self.ops.set_id)(self.cell.as_ref(), id)
    }
}

mod erased {
    use super::*;

    fn cell<T: Persist>(any: &(dyn Any + Send + Sync)) -> Result<&RwLock<T>> {
        any.downcast_ref::<RwLock<T>>().ok_or_else(|| {
            DbError::InvalidOperation("tracked entity has an unexpected runtime type".into())
        })
    }

    pub(super) fn to_value<T: Persist>(any: &(dyn Any + Send + Sync)) -> Result<Value> {
        let guard = cell::<T>(any)?.read()?;
        Ok(serde_json::to_value(&*guard)?)
    }

    pub(super) fn get_id<T: Persist>(any: &(dyn Any + Send + Sync)) -> Result<i64> {
        Ok(cell::<T>(any)?.read()?.id())
    }

    pub(super) fn set_id<T: Persist>(any: &(dyn Any + Send + Sync), id: i64) -> Result<()> {
        cell::<T>(any)?.write()?.set_id(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct Ticket {
        id: i64,
        title: String,
    }

    impl Persist for Ticket {
        fn type_name() -> &'static str {
            "Ticket"
        }

        fn id(&self) -> i64 {
            self.id
        }

        fn set_id(&mut self, id: i64) {
            self.id = id;
        }
    }

    #[test]
    fn test_erased_round_trip() {
        let tracked = Tracked::new(Ticket {
            id: 0,
            title: "first".into(),
        });
        let erased = tracked.erase();

        assert_eq!(erased.type_name(), "Ticket");
        assert_eq!(erased.entity_id().unwrap(), 0);

        erased.write_id(42).unwrap();
        assert_eq!(tracked.read().unwrap().id, 42);

        let value = erased.to_value().unwrap();
        assert_eq!(value["title"], "first");
        assert_eq!(value["id"], 42);
    }

    #[test]
    fn test_clone_preserves_identity() {
        let tracked = Tracked::new(Ticket {
            id: 0,
            title: "x".into(),
        });
        let clone = tracked.clone();

        assert!(tracked.ptr_eq(&clone));
        assert!(tracked.erase().same_entity(&clone.erase()));

        let other = Tracked::new(Ticket {
            id: 0,
            title: "x".into(),
        });
        assert!(!tracked.ptr_eq(&other));
    }

    #[test]
    fn test_downcast_back_to_typed_handle() {
        let tracked = Tracked::new(Ticket {
            id: 3,
            title: "y".into(),
        });
        let erased = tracked.erase();

        let back = Tracked::<Ticket>::from_erased(&erased).unwrap();
        assert!(tracked.ptr_eq(&back));
    }
}
