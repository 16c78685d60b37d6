//! Merging a viewer's own actions with everything they follow.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use anyhow::Result;
use tracing::debug;

use crate::activity_stream::entity::{EntityRef, Followable};
use crate::activity_stream::model::{Action, Follow, FollowScope};
use crate::activity_stream::query::ActionQuery;
use crate::activity_stream::repo::{ActionStore, FollowRepo};
use crate::config::FeedConfig;

/// Newest first; ties by id, also descending.
pub fn newest_first(a: &Action, b: &Action) -> Ordering {
    b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id))
}

pub fn sort_newest_first(actions: &mut [Action]) {
    actions.sort_by(newest_first);
}

/// Picks the row that says when `user` started following an entity: the
/// earliest follow id, whatever its category.
pub fn select_follow_record(rows: &[Follow]) -> Option<&Follow> {
    let first = rows.iter().min_by_key(|follow| follow.id)?;
    if rows.len() > 1 {
        debug!(
            target: "feed",
            user = %first.user,
            entity = %first.entity,
            rows = rows.len(),
            chosen = %first.id,
            "several follow rows, using the earliest"
        );
    }
    Some(first)
}

pub struct StreamComposer<'a> {
    actions: &'a ActionStore,
    follows: &'a FollowRepo,
    config: &'a FeedConfig,
}

impl<'a> StreamComposer<'a> {
    pub fn new(
        actions: &'a ActionStore,
        follows: &'a FollowRepo,
        config: &'a FeedConfig,
    ) -> StreamComposer<'a> {
        StreamComposer {
            actions,
            follows,
            config,
        }
    }

    /// Builds the unevaluated query behind the "following" feed of `user`.
    pub fn following_query(&self, user: &EntityRef) -> Result<ActionQuery> {
        let mut query = ActionQuery::actor(user).public();
        let mut vendors = ActionQuery::none();
        let mut seen = BTreeSet::new();

        for follow in self.follows.following(user)? {
            let entity = follow.entity;
            if follow.category == self.config.vendor_category {
                vendors = vendors
                    .union(ActionQuery::target(&entity))
                    .union(ActionQuery::action_object(&entity));
                continue;
            }
            if !seen.insert(entity.clone()) {
                continue;
            }
            let rows: Vec<Follow> = self
                .follows
                .find_all(user, &entity)?
                .into_iter()
                .filter(|row| row.category != self.config.vendor_category)
                .collect();
            let Some(record) = select_follow_record(&rows) else {
                continue;
            };
            query = query.union(
                ActionQuery::actor(&entity.actor_identity())
                    .public()
                    .since(record.started),
            );
            if entity.supports_legacy_follow() || record.scope == FollowScope::AllRoles {
                query = query
                    .union(ActionQuery::action_object(&entity).public().since(record.started))
                    .union(ActionQuery::target(&entity).public().since(record.started));
            }
        }

        let own_noise = ActionQuery::actor(user).exclude_verbs(self.config.self_verbs.clone());
        query = query.exclude(own_noise);
        if vendors != ActionQuery::none() {
            query = query.exclude(vendors);
        }
        Ok(query)
    }

    /// The "following" feed of `user`, newest first.
    pub fn compose(&self, user: &EntityRef) -> Result<Vec<Action>> {
        let query = self.following_query(user)?;
        let mut stream = self.actions.fetch(&query)?;
        sort_newest_first(&mut stream);
        debug!(target: "feed", %user, len = stream.len(), "composed feed");
        Ok(stream)
    }

    /// The public actions `actor` performed, newest first.
    pub fn compose_actor(&self, actor: &EntityRef) -> Result<Vec<Action>> {
        let mut stream = self.actions.fetch(&ActionQuery::actor(actor).public())?;
        sort_newest_first(&mut stream);
        Ok(stream)
    }
}
