use anyhow::Result;
use fjall::{Batch, PartitionHandle};

use crate::activity_stream::entity::EntityRef;
use crate::activity_stream::model::ActionId;

use super::xkey::{EntityActionKey, entity_prefix};

/// Index from an entity to the ids of actions that name it in one role.
#[derive(Clone)]
pub(super) struct EntityIndex {
    index: PartitionHandle,
}

impl EntityIndex {
    pub(super) fn new(index: PartitionHandle) -> EntityIndex {
        EntityIndex { index }
    }
    pub(super) fn insert(&self, b: &mut Batch, entity: &EntityRef, id: ActionId) {
        b.insert(&self.index, EntityActionKey::new(entity, id), Vec::<u8>::new());
    }
    pub(super) fn count(&self, entity: &EntityRef) -> u64 {
        // FIXME optimize scanning
        self.index.prefix(entity_prefix(entity)).count() as u64
    }
    /// Action ids naming `entity`, ascending.
    pub(super) fn find_all(&self, entity: &EntityRef) -> Result<Vec<ActionId>> {
        let mut ids = vec![];
        for pair in self.index.prefix(entity_prefix(entity)) {
            let (key, _) = pair?;
            if let Some(id) = EntityActionKey::from(key.as_ref()).action_id() {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}
