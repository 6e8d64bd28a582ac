use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::descriptor::{ErasedDescriptor, IndexDescriptor, IndexModel};
use crate::core::Persist;

/// Registered index descriptors, looked up by entity type name at commit
/// time. Descriptors for one entity type keep registration order, which is
/// the order the pipeline processes them in.
#[derive(Default)]
pub struct DescriptorRegistry {
    by_entity: HashMap<&'static str, Vec<Arc<ErasedDescriptor>>>,
    index_types: HashSet<TypeId>,
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Persist, I: IndexModel>(&mut self, descriptor: IndexDescriptor<T, I>) {
        let erased = Arc::new(descriptor.erase());
        self.index_types.insert(erased.index_type_id);
        self.by_entity
            .entry(erased.entity_type)
            .or_default()
            .push(erased);
    }

    pub(crate) fn descriptors_for(&self, entity_type: &str) -> &[Arc<ErasedDescriptor>] {
        self.by_entity
            .get(entity_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether a type is registered as an index row type; such types are not
    /// saveable as entities.
    pub(crate) fn is_index_type(&self, type_id: TypeId) -> bool {
        self.index_types.contains(&type_id)
    }
}
