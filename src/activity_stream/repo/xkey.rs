use fjall::{Slice, UserKey};

use crate::activity_stream::entity::EntityRef;
use crate::activity_stream::model::ActionId;

/// NUL terminated `<kind>:<id>` prefix, so `user:1` never matches `user:12`.
pub(super) fn entity_prefix(entity: &EntityRef) -> Vec<u8> {
    let mut key = entity.to_string().into_bytes();
    key.push(0);
    key
}

/// `<entity>\0<action id>` key of a per-entity action index.
#[derive(Clone)]
pub(super) struct EntityActionKey(Slice);

impl EntityActionKey {
    pub(super) fn new(entity: &EntityRef, action_id: ActionId) -> EntityActionKey {
        let mut key = entity_prefix(entity);
        key.extend_from_slice(&action_id.to_be_bytes());
        EntityActionKey(key.into())
    }
    pub(super) fn action_id(&self) -> Option<ActionId> {
        let start = self.0.len().checked_sub(8)?;
        ActionId::try_from(&self.0[start..]).ok()
    }
}

impl From<EntityActionKey> for UserKey {
    fn from(value: EntityActionKey) -> Self {
        value.0
    }
}

impl From<&[u8]> for EntityActionKey {
    fn from(value: &[u8]) -> Self {
        EntityActionKey(Slice::new(value))
    }
}

/// `<user>\0<entity>\0<category>` key of a follow edge, or the reverse
/// `<entity>\0<user>\0<category>` for the followers index.
pub(super) fn edge_key(from: &EntityRef, to: &EntityRef, category: &str) -> Vec<u8> {
    let mut key = edge_prefix(from, to);
    key.extend_from_slice(category.as_bytes());
    key
}

pub(super) fn edge_prefix(from: &EntityRef, to: &EntityRef) -> Vec<u8> {
    let mut key = entity_prefix(from);
    key.extend_from_slice(&entity_prefix(to));
    key
}

#[cfg(test)]
mod tests {
    use crate::activity_stream::entity::EntityRef;
    use crate::activity_stream::model::ActionId;

    use super::{EntityActionKey, edge_key, edge_prefix, entity_prefix};

    #[test]
    fn action_key_recovers_id() {
        let key = EntityActionKey::new(&EntityRef::user(3), ActionId(515));
        assert_eq!(key.action_id(), Some(ActionId(515)));
        let raw: fjall::UserKey = key.into();
        assert!(raw.starts_with(&entity_prefix(&EntityRef::user(3))));
        assert!(!raw.starts_with(&entity_prefix(&EntityRef::user(31))));
    }

    #[test]
    fn edge_prefix_covers_every_category() {
        let user = EntityRef::user(1);
        let org = EntityRef::organization(2);
        let prefix = edge_prefix(&user, &org);
        assert!(edge_key(&user, &org, "").starts_with(&prefix));
        assert!(edge_key(&user, &org, "vendor").starts_with(&prefix));
        assert!(!edge_key(&user, &EntityRef::organization(20), "").starts_with(&prefix));
    }
}
