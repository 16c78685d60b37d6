use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle};
use jiff::Timestamp;
use jiff::civil::Date;
use jiff::tz::TimeZone;
use tracing::debug;

use crate::activity_stream::entity::EntityRef;
use crate::activity_stream::model::{
    Action, ActionId, ActionState, NewAction, stored_precision,
};
use crate::activity_stream::query::{ActionFilter, ActionQuery, Source};

use super::xindex::EntityIndex;

/// Append-only action records plus one index per role an entity can play.
#[derive(Clone)]
pub struct ActionStore {
    keyspace: Keyspace,
    actions: PartitionHandle,
    by_actor: EntityIndex,
    by_target: EntityIndex,
    by_object: EntityIndex,
    next_id: Arc<AtomicU64>,
}

fn action_key(id: ActionId) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

fn utc_date(timestamp: Timestamp) -> Date {
    timestamp.to_zoned(TimeZone::UTC).date()
}

impl ActionStore {
    pub fn new(keyspace: Keyspace) -> Result<ActionStore> {
        let options = PartitionCreateOptions::default();
        let actions = keyspace.open_partition("actions", options.clone())?;
        let by_actor = EntityIndex::new(keyspace.open_partition("actor_index", options.clone())?);
        let by_target =
            EntityIndex::new(keyspace.open_partition("target_index", options.clone())?);
        let by_object = EntityIndex::new(keyspace.open_partition("object_index", options)?);
        let last_id = match actions.last_key_value()? {
            Some((key, _)) => ActionId::try_from(key.as_ref())?.0,
            None => 0,
        };
        Ok(ActionStore {
            keyspace,
            actions,
            by_actor,
            by_target,
            by_object,
            next_id: Arc::new(AtomicU64::new(last_id + 1)),
        })
    }

    /// Stores a new action, unless the same public event was already recorded
    /// on the same UTC calendar day. In that case the newest copy takes the
    /// new timestamp, older copies are retired, and the survivor is returned.
    pub fn record(&self, new: NewAction) -> Result<Action> {
        let timestamp = stored_precision(new.timestamp.unwrap_or_else(Timestamp::now))?;
        if new.public {
            if let Some(action) = self.merge_duplicates(&new, timestamp)? {
                return Ok(action);
            }
        }

        let id = ActionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let action = new.into_action(id, timestamp);
        let mut batch = self.keyspace.batch();
        batch.insert(&self.actions, action_key(id), action.clone().into_bytes()?);
        self.by_actor.insert(&mut batch, &action.actor, id);
        if let Some(target) = &action.target {
            self.by_target.insert(&mut batch, target, id);
        }
        if let Some(object) = &action.action_object {
            self.by_object.insert(&mut batch, object, id);
        }
        batch.commit()?;
        debug!(target: "store", %id, actor = %action.actor, verb = %action.verb, "recorded action");
        Ok(action)
    }

    fn merge_duplicates(&self, new: &NewAction, timestamp: Timestamp) -> Result<Option<Action>> {
        let day = utc_date(timestamp);
        let mut duplicates = vec![];
        for id in self.by_actor.find_all(&new.actor)? {
            if let Some(action) = self.find_one(id)? {
                if action.is_active()
                    && action.public
                    && action.same_event(new)
                    && utc_date(action.timestamp) == day
                {
                    duplicates.push(action);
                }
            }
        }
        let Some(mut keep) = duplicates.pop() else {
            return Ok(None);
        };

        let mut batch = self.keyspace.batch();
        keep.timestamp = timestamp;
        batch.insert(&self.actions, action_key(keep.id), keep.clone().into_bytes()?);
        let retired = duplicates.len();
        for mut extra in duplicates {
            extra.state = ActionState::Deleted;
            batch.insert(&self.actions, action_key(extra.id), extra.into_bytes()?);
        }
        batch.commit()?;
        debug!(target: "store", id = %keep.id, retired, "merged duplicate action");
        Ok(Some(keep))
    }

    pub fn find_one(&self, id: ActionId) -> Result<Option<Action>> {
        if let Some(bytes) = self.actions.get(action_key(id))? {
            return Ok(Some(Action::from_bytes(&bytes)?));
        }
        Ok(None)
    }

    /// Soft-deletes every listed action in one atomic batch.
    pub(crate) fn soft_delete(&self, ids: &[ActionId]) -> Result<usize> {
        let mut batch = self.keyspace.batch();
        let mut deleted = 0;
        for &id in ids {
            if let Some(mut action) = self.find_one(id)? {
                if action.is_active() {
                    action.state = ActionState::Deleted;
                    batch.insert(&self.actions, action_key(id), action.into_bytes()?);
                    deleted += 1;
                }
            }
        }
        batch.commit()?;
        Ok(deleted)
    }

    /// Materializes a query, ascending by id.
    pub fn fetch(&self, query: &ActionQuery) -> Result<Vec<Action>> {
        Ok(self.eval(query)?.into_values().collect())
    }

    pub fn count(&self, query: &ActionQuery) -> Result<u64> {
        Ok(self.eval(query)?.len() as u64)
    }

    /// Number of actions ever recorded by `actor`, deleted ones included.
    pub fn count_by_actor(&self, actor: &EntityRef) -> u64 {
        self.by_actor.count(actor)
    }

    fn eval(&self, query: &ActionQuery) -> Result<BTreeMap<ActionId, Action>> {
        match query {
            ActionQuery::Scan(source, filter) => self.scan(source, filter),
            ActionQuery::Union(parts) => {
                let mut result = BTreeMap::new();
                for part in parts {
                    result.extend(self.eval(part)?);
                }
                Ok(result)
            }
            ActionQuery::Intersect(left, right) => {
                let mut result = self.eval(left)?;
                let right = self.eval(right)?;
                result.retain(|id, _| right.contains_key(id));
                Ok(result)
            }
            ActionQuery::Exclude(left, right) => {
                let mut result = self.eval(left)?;
                let right = self.eval(right)?;
                result.retain(|id, _| !right.contains_key(id));
                Ok(result)
            }
            ActionQuery::Filter(inner, filter) => {
                let mut result = self.eval(inner)?;
                result.retain(|_, action| filter.matches(action));
                Ok(result)
            }
        }
    }

    fn scan(&self, source: &Source, filter: &ActionFilter) -> Result<BTreeMap<ActionId, Action>> {
        let mut result = BTreeMap::new();
        let ids = match source {
            Source::All => {
                for bytes in self.actions.values() {
                    let action = Action::from_bytes(&bytes?)?;
                    if filter.matches(&action) {
                        result.insert(action.id, action);
                    }
                }
                return Ok(result);
            }
            Source::Actor(entity) => self.by_actor.find_all(entity)?,
            Source::Target(entity) => self.by_target.find_all(entity)?,
            Source::ActionObject(entity) => self.by_object.find_all(entity)?,
        };
        for id in ids {
            if let Some(action) = self.find_one(id)? {
                if filter.matches(&action) {
                    result.insert(id, action);
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use fjall::Config;
    use jiff::Timestamp;
    use tempfile::tempdir;

    use crate::activity_stream::entity::EntityRef;
    use crate::activity_stream::model::{ActionId, NewAction};
    use crate::activity_stream::query::ActionQuery;

    use super::ActionStore;

    fn at(second: i64) -> Timestamp {
        Timestamp::from_second(second).unwrap()
    }

    #[test]
    fn ids_are_monotonic_across_reopen() -> Result<()> {
        let tmp_dir = tempdir()?;
        let keyspace = Config::new(tmp_dir.path()).temporary(true).open()?;
        let store = ActionStore::new(keyspace.clone())?;
        let first = store.record(NewAction::new(EntityRef::user(1), "said").at(at(10)))?;
        let second = store.record(NewAction::new(EntityRef::user(2), "said").at(at(5)))?;
        assert!(first.id < second.id);

        let reopened = ActionStore::new(keyspace)?;
        let third = reopened.record(NewAction::new(EntityRef::user(3), "said").at(at(1)))?;
        assert!(second.id < third.id);
        assert_eq!(reopened.find_one(first.id)?, Some(first));
        Ok(())
    }

    #[test]
    fn recorded_action_matches_its_stored_copy() -> Result<()> {
        let tmp_dir = tempdir()?;
        let keyspace = Config::new(tmp_dir.path()).temporary(true).open()?;
        let store = ActionStore::new(keyspace)?;
        let precise = Timestamp::from_nanosecond(1_700_000_000_123_456_789)?;

        let stamped = store.record(NewAction::new(EntityRef::user(1), "said").at(precise))?;
        assert_eq!(stamped.timestamp.as_millisecond(), 1_700_000_000_123);
        assert_eq!(stamped.timestamp.subsec_nanosecond() % 1_000_000, 0);
        assert_eq!(store.find_one(stamped.id)?, Some(stamped));

        let unstamped = store.record(NewAction::new(EntityRef::user(2), "said"))?;
        assert_eq!(store.find_one(unstamped.id)?, Some(unstamped));
        Ok(())
    }

    #[test]
    fn same_day_duplicate_collapses_to_latest() -> Result<()> {
        let tmp_dir = tempdir()?;
        let keyspace = Config::new(tmp_dir.path()).temporary(true).open()?;
        let store = ActionStore::new(keyspace)?;
        let event = NewAction::new(EntityRef::user(1), "viewed a company")
            .target(EntityRef::organization(7));

        let first = store.record(event.clone().at(at(1_000)))?;
        let second = store.record(event.clone().at(at(2_000)))?;
        assert_eq!(first.id, second.id);
        assert_eq!(second.timestamp, at(2_000));

        let stored = store.fetch(&ActionQuery::actor(&EntityRef::user(1)))?;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].timestamp, at(2_000));

        // next day is a new event
        let next_day = store.record(event.at(at(2_000 + 86_400)))?;
        assert_ne!(next_day.id, first.id);
        assert_eq!(store.count(&ActionQuery::actor(&EntityRef::user(1)))?, 2);
        Ok(())
    }

    #[test]
    fn private_actions_are_never_merged() -> Result<()> {
        let tmp_dir = tempdir()?;
        let keyspace = Config::new(tmp_dir.path()).temporary(true).open()?;
        let store = ActionStore::new(keyspace)?;
        let event = NewAction::new(EntityRef::user(1), "said").private();
        let first = store.record(event.clone().at(at(1)))?;
        let second = store.record(event.at(at(2)))?;
        assert_ne!(first.id, second.id);
        assert_eq!(store.count(&ActionQuery::actor(&EntityRef::user(1)).public())?, 0);
        Ok(())
    }

    #[test]
    fn set_operations() -> Result<()> {
        let tmp_dir = tempdir()?;
        let keyspace = Config::new(tmp_dir.path()).temporary(true).open()?;
        let store = ActionStore::new(keyspace)?;
        let alice = EntityRef::user(1);
        let bob = EntityRef::user(2);
        let org = EntityRef::organization(3);

        let a = store.record(
            NewAction::new(alice.clone(), "posted a review")
                .target(org.clone())
                .at(at(10)),
        )?;
        let b = store.record(NewAction::new(alice.clone(), "said").at(at(20)))?;
        let c = store.record(NewAction::new(bob.clone(), "liked").target(org.clone()).at(at(30)))?;

        let ids = |query: &ActionQuery| -> Result<Vec<ActionId>> {
            Ok(store.fetch(query)?.into_iter().map(|a| a.id).collect())
        };

        let union = ActionQuery::actor(&alice).union(ActionQuery::target(&org));
        assert_eq!(ids(&union)?, vec![a.id, b.id, c.id]);

        let both = ActionQuery::actor(&alice).intersect(ActionQuery::target(&org));
        assert_eq!(ids(&both)?, vec![a.id]);

        let minus = ActionQuery::target(&org).exclude(ActionQuery::actor(&bob));
        assert_eq!(ids(&minus)?, vec![a.id]);

        let recent = union.clone().since(at(15)).until(at(25));
        assert_eq!(ids(&recent)?, vec![b.id]);

        let no_chatter = union.exclude_verbs(["said"]);
        assert_eq!(ids(&no_chatter)?, vec![a.id, c.id]);

        assert_eq!(ids(&ActionQuery::all().after(a.id))?, vec![b.id, c.id]);
        Ok(())
    }

    #[test]
    fn soft_deleted_actions_leave_queries() -> Result<()> {
        let tmp_dir = tempdir()?;
        let keyspace = Config::new(tmp_dir.path()).temporary(true).open()?;
        let store = ActionStore::new(keyspace)?;
        let user = EntityRef::user(1);
        let kept = store.record(NewAction::new(user.clone(), "said").at(at(1)))?;
        let gone = store.record(NewAction::new(user.clone(), "shared").at(at(2)))?;

        assert_eq!(store.soft_delete(&[gone.id])?, 1);
        assert_eq!(store.soft_delete(&[gone.id])?, 0);

        let remaining = store.fetch(&ActionQuery::actor(&user))?;
        assert_eq!(remaining, vec![kept]);
        assert!(store.find_one(gone.id)?.is_some_and(|a| !a.is_active()));
        assert_eq!(store.count_by_actor(&user), 2);
        Ok(())
    }
}
