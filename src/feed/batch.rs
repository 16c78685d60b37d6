//! Collapsing near-simultaneous, interchangeable actions into one entry.
//!
//! A cluster is keyed by its representative action and holds the ids it
//! subsumes. An id is subsumed by at most one cluster and a representative
//! is never subsumed by another one.

use std::collections::{BTreeMap, BTreeSet};

use jiff::{SignedDuration, Timestamp};
use minicbor::{Decode, Encode};
use tracing::debug;

use crate::activity_stream::model::{Action, ActionId};
use crate::config::FeedConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct BatchMap {
    #[n(0)]
    clusters: BTreeMap<ActionId, BTreeSet<ActionId>>,
}

impl BatchMap {
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
    pub fn len(&self) -> usize {
        self.clusters.len()
    }
    pub fn is_representative(&self, id: ActionId) -> bool {
        self.clusters.contains_key(&id)
    }
    pub fn is_subsumed(&self, id: ActionId) -> bool {
        self.clusters.values().any(|members| members.contains(&id))
    }
    pub fn members(&self, representative: ActionId) -> Option<&BTreeSet<ActionId>> {
        self.clusters.get(&representative)
    }
    /// Adds `member` to the cluster of `representative` unless it already
    /// belongs to a cluster or the move would break the invariants. Returns
    /// whether it was newly added.
    pub fn absorb(&mut self, representative: ActionId, member: ActionId) -> bool {
        if member == representative
            || self.is_representative(member)
            || self.is_subsumed(representative)
            || self.is_subsumed(member)
        {
            return false;
        }
        self.clusters.entry(representative).or_default().insert(member)
    }
    /// Folds another map into this one, keeping this map's assignments where
    /// the two disagree.
    pub fn merge(&mut self, other: BatchMap) {
        for (representative, members) in other.clusters {
            for member in members {
                self.absorb(representative, member);
            }
        }
    }
}

/// Groups a window of a composed stream against the whole stream.
pub struct BatchGrouper<'a> {
    stream: &'a [Action],
    follow_verb: &'a str,
    default_minutes: u32,
}

impl<'a> BatchGrouper<'a> {
    pub fn new(stream: &'a [Action], config: &'a FeedConfig) -> BatchGrouper<'a> {
        BatchGrouper {
            stream,
            follow_verb: &config.follow_verb,
            default_minutes: config.default_batch_minutes,
        }
    }

    /// Clusters each batchable, not yet subsumed action of `window` (in
    /// stream order) with its interchangeable, batchable predecessors.
    /// Returns the number of ids newly subsumed.
    pub fn group<'w>(
        &self,
        window: impl IntoIterator<Item = &'w Action>,
        batches: &mut BatchMap,
    ) -> usize {
        let mut absorbed = 0;
        for action in window {
            if !action.is_batchable || batches.is_subsumed(action.id) {
                continue;
            }
            let cutoff = self.cutoff(action);
            for candidate in self.stream {
                if !candidate.is_batchable {
                    continue;
                }
                if candidate.timestamp < cutoff || candidate.timestamp > action.timestamp {
                    continue;
                }
                if !self.interchangeable(action, candidate) {
                    continue;
                }
                if batches.absorb(action.id, candidate.id) {
                    absorbed += 1;
                }
            }
            if let Some(members) = batches.members(action.id) {
                debug!(target: "batch", id = %action.id, members = members.len(), "batched");
            }
        }
        absorbed
    }

    fn cutoff(&self, action: &Action) -> Timestamp {
        let minutes = match action.batch_time_minutes {
            0 => self.default_minutes,
            minutes => minutes,
        };
        action
            .timestamp
            .checked_sub(SignedDuration::from_mins(i64::from(minutes)))
            .unwrap_or(Timestamp::MIN)
    }

    /// Same actor, verb and target kind; except for follows, the same target.
    fn interchangeable(&self, action: &Action, candidate: &Action) -> bool {
        if candidate.id == action.id
            || candidate.actor != action.actor
            || candidate.verb != action.verb
        {
            return false;
        }
        let same_kind = match (&action.target, &candidate.target) {
            (Some(a), Some(b)) => a.kind == b.kind,
            (None, None) => true,
            _ => false,
        };
        same_kind && (action.verb == self.follow_verb || action.target == candidate.target)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use jiff::Timestamp;

    use crate::activity_stream::entity::EntityRef;
    use crate::activity_stream::model::{Action, ActionId, NewAction};
    use crate::config::FeedConfig;

    use super::{BatchGrouper, BatchMap};

    fn minute(m: i64) -> Timestamp {
        Timestamp::from_second(m * 60).unwrap()
    }

    fn newest_first(mut actions: Vec<Action>) -> Vec<Action> {
        actions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        actions
    }

    fn like(id: u64, at: i64, target: u64, object: u64) -> Action {
        NewAction::new(EntityRef::user(1), "liked")
            .target(EntityRef::post(target))
            .action_object(EntityRef::post(object))
            .batchable(30)
            .into_action(ActionId(id), minute(at))
    }

    #[test]
    fn clusters_within_window() -> Result<()> {
        let config = FeedConfig::default();
        let stream = newest_first(vec![
            like(1, 0, 9, 100),
            like(2, 5, 9, 101),
            like(3, 50, 9, 102),
        ]);
        let mut batches = BatchMap::default();
        let absorbed = BatchGrouper::new(&stream, &config).group(&stream, &mut batches);

        assert_eq!(absorbed, 1);
        // 3 at 0:50 reaches back to 0:20 only, so 2 leads the older pair
        assert_eq!(batches.members(ActionId(3)), None);
        assert_eq!(batches.members(ActionId(2)), Some(&[ActionId(1)].into()));
        assert!(!batches.is_representative(ActionId(1)));
        Ok(())
    }

    #[test]
    fn representative_is_the_newest() -> Result<()> {
        let config = FeedConfig::default();
        let stream = newest_first(vec![like(1, 0, 9, 100), like(2, 5, 9, 101)]);
        let mut batches = BatchMap::default();
        BatchGrouper::new(&stream, &config).group(&stream, &mut batches);
        assert_eq!(batches.members(ActionId(2)), Some(&[ActionId(1)].into()));
        assert!(batches.is_subsumed(ActionId(1)));
        assert!(!batches.is_subsumed(ActionId(2)));
        Ok(())
    }

    #[test]
    fn window_uses_default_when_unset() -> Result<()> {
        let config = FeedConfig::default();
        let mut late = like(2, 29, 9, 101);
        late.batch_time_minutes = 0;
        let stream = newest_first(vec![like(1, 0, 9, 100), late]);
        let mut batches = BatchMap::default();
        BatchGrouper::new(&stream, &config).group(&stream, &mut batches);
        assert!(batches.is_subsumed(ActionId(1)));

        let mut short = like(4, 10, 9, 103);
        short.batch_time_minutes = 5;
        let stream = newest_first(vec![like(3, 0, 9, 102), short]);
        let mut batches = BatchMap::default();
        BatchGrouper::new(&stream, &config).group(&stream, &mut batches);
        assert!(batches.is_empty());
        Ok(())
    }

    #[test]
    fn different_targets_only_batch_for_follows() -> Result<()> {
        let config = FeedConfig::default();
        let follow = |id: u64, at: i64, org: u64| {
            NewAction::new(EntityRef::user(1), config.follow_verb.clone())
                .target(EntityRef::organization(org))
                .batchable(30)
                .into_action(ActionId(id), minute(at))
        };
        let stream = newest_first(vec![
            follow(1, 0, 7),
            follow(2, 1, 8),
            like(3, 2, 10, 100),
            like(4, 3, 11, 101),
        ]);
        let mut batches = BatchMap::default();
        BatchGrouper::new(&stream, &config).group(&stream, &mut batches);
        assert_eq!(batches.members(ActionId(2)), Some(&[ActionId(1)].into()));
        assert!(!batches.is_subsumed(ActionId(3)));
        assert_eq!(batches.len(), 1);
        Ok(())
    }

    #[test]
    fn non_batchable_actions_stand_alone() -> Result<()> {
        let config = FeedConfig::default();
        let mut plain = like(2, 5, 9, 101);
        plain.is_batchable = false;
        let stream = newest_first(vec![like(1, 0, 9, 100), plain]);
        let mut batches = BatchMap::default();
        BatchGrouper::new(&stream, &config).group(&stream, &mut batches);
        // 2 does not lead, but 1 may not reach forward either
        assert!(batches.is_empty());
        Ok(())
    }

    #[test]
    fn plain_actions_are_never_absorbed() -> Result<()> {
        let config = FeedConfig::default();
        let mut plain = like(2, 10, 9, 101);
        plain.is_batchable = false;
        let mut older = like(3, 4, 9, 102);
        older.is_batchable = false;
        let stream = newest_first(vec![like(1, 10, 9, 100), plain, older]);
        // the plain action sorts first on the shared timestamp
        assert_eq!(stream[0].id, ActionId(2));

        let mut batches = BatchMap::default();
        BatchGrouper::new(&stream, &config).group(&stream, &mut batches);
        assert!(!batches.is_subsumed(ActionId(2)));
        assert!(!batches.is_subsumed(ActionId(3)));
        assert!(batches.is_empty());
        Ok(())
    }

    #[test]
    fn regrouping_is_idempotent() -> Result<()> {
        let config = FeedConfig::default();
        let stream = newest_first(vec![like(1, 0, 9, 100), like(2, 5, 9, 101), like(3, 6, 9, 102)]);
        let grouper = BatchGrouper::new(&stream, &config);
        let mut batches = BatchMap::default();
        grouper.group(&stream[..1], &mut batches);
        let snapshot = batches.clone();
        assert_eq!(grouper.group(&stream, &mut batches), 0);
        assert_eq!(batches, snapshot);
        assert_eq!(
            batches.members(ActionId(3)),
            Some(&[ActionId(1), ActionId(2)].into())
        );
        Ok(())
    }

    #[test]
    fn absorb_keeps_invariants() {
        let mut batches = BatchMap::default();
        assert!(batches.absorb(ActionId(5), ActionId(4)));
        assert!(!batches.absorb(ActionId(5), ActionId(5)));
        // 4 already belongs to 5
        assert!(!batches.absorb(ActionId(6), ActionId(4)));
        // 5 leads a cluster, so it cannot be subsumed
        assert!(!batches.absorb(ActionId(6), ActionId(5)));
        // 4 is subsumed, so it cannot lead
        assert!(!batches.absorb(ActionId(4), ActionId(3)));

        let mut other = BatchMap::default();
        other.absorb(ActionId(9), ActionId(4));
        other.absorb(ActionId(9), ActionId(8));
        batches.merge(other);
        assert_eq!(batches.members(ActionId(9)), Some(&[ActionId(8)].into()));
        assert_eq!(batches.members(ActionId(5)), Some(&[ActionId(4)].into()));
    }
}
