use crate::core::EntityRef;

/// Pending explicit saves and deletes, kept in call order and deduped by
/// entity handle so repeated calls for one object queue one unit of work.
#[derive(Default)]
pub(crate) struct ChangeTracker {
    saves: Vec<EntityRef>,
    deletes: Vec<EntityRef>,
}

impl ChangeTracker {
    /// Queues an entity for insertion; returns `false` if already pending.
    pub fn queue_save(&mut self, entity: EntityRef) -> bool {
        if self.saves.iter().any(|queued| queued.same_entity(&entity)) {
            return false;
        }
        self.saves.push(entity);
        true
    }

    /// Queues an entity for deletion; returns `false` if already pending.
    pub fn queue_delete(&mut self, entity: EntityRef) -> bool {
        if self.deletes.iter().any(|queued| queued.same_entity(&entity)) {
            return false;
        }
        self.deletes.push(entity);
        true
    }

    pub fn is_delete_pending(&self, entity: &EntityRef) -> bool {
        self.deletes.iter().any(|queued| queued.same_entity(entity))
    }

    pub fn take_saves(&mut self) -> Vec<EntityRef> {
        std::mem::take(&mut self.saves)
    }

    pub fn take_deletes(&mut self) -> Vec<EntityRef> {
        std::mem::take(&mut self.deletes)
    }
}
