use std::collections::{BTreeMap, HashMap};

use crate::core::EntityRef;

/// Within-session bijection between document ids and tracked entities.
///
/// `by_id` is ordered so commit-time traversal is deterministic (ascending
/// id); `by_addr` keys on the entity cell address for O(1) membership.
#[derive(Default)]
pub(crate) struct IdentityMap {
    by_id: BTreeMap<i64, EntityRef>,
    by_addr: HashMap<usize, i64>,
}

impl IdentityMap {
    pub fn insert(&mut self, id: i64, entity: EntityRef) {
        self.by_addr.insert(entity.addr(), id);
        self.by_id.insert(id, entity);
    }

    pub fn get(&self, id: i64) -> Option<&EntityRef> {
        self.by_id.get(&id)
    }

    pub fn id_of(&self, entity: &EntityRef) -> Option<i64> {
        self.by_addr.get(&entity.addr()).copied()
    }

    pub fn has(&self, entity: &EntityRef) -> bool {
        self.by_addr.contains_key(&entity.addr())
    }

    pub fn remove(&mut self, id: i64) -> Option<EntityRef> {
        let entity = self.by_id.remove(&id)?;
        self.by_addr.remove(&entity.addr());
        Some(entity)
    }

    /// Tracked entries in ascending id order, detached from the map so the
    /// caller may mutate it while iterating.
    pub fn entries(&self) -> Vec<(i64, EntityRef)> {
        self.by_id
            .iter()
            .map(|(&id, entity)| (id, entity.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }
}
