//! Composable, lazily evaluated queries over recorded actions.
//!
//! A query is a plain value until it is handed to
//! [`ActionStore::fetch`](super::ActionStore::fetch) or
//! [`ActionStore::count`](super::ActionStore::count).

use std::collections::BTreeSet;

use jiff::Timestamp;

use super::entity::EntityRef;
use super::model::{Action, ActionId};

/// Where a scan starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    All,
    Actor(EntityRef),
    Target(EntityRef),
    ActionObject(EntityRef),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionFilter {
    /// Allow-list; `None` admits every verb.
    pub verbs: Option<BTreeSet<String>>,
    pub exclude_verbs: BTreeSet<String>,
    pub public_only: bool,
    pub since: Option<Timestamp>,
    pub until: Option<Timestamp>,
    pub after_id: Option<ActionId>,
    pub include_deleted: bool,
}

impl ActionFilter {
    pub fn matches(&self, action: &Action) -> bool {
        if !self.include_deleted && !action.is_active() {
            return false;
        }
        if self.public_only && !action.public {
            return false;
        }
        if let Some(verbs) = &self.verbs {
            if !verbs.contains(&action.verb) {
                return false;
            }
        }
        if self.exclude_verbs.contains(&action.verb) {
            return false;
        }
        if self.since.is_some_and(|since| action.timestamp < since) {
            return false;
        }
        if self.until.is_some_and(|until| action.timestamp > until) {
            return false;
        }
        if self.after_id.is_some_and(|after| action.id <= after) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionQuery {
    Scan(Source, ActionFilter),
    Union(Vec<ActionQuery>),
    Intersect(Box<ActionQuery>, Box<ActionQuery>),
    Exclude(Box<ActionQuery>, Box<ActionQuery>),
    Filter(Box<ActionQuery>, ActionFilter),
}

impl ActionQuery {
    pub fn all() -> ActionQuery {
        ActionQuery::Scan(Source::All, ActionFilter::default())
    }
    pub fn actor(entity: &EntityRef) -> ActionQuery {
        ActionQuery::Scan(Source::Actor(entity.clone()), ActionFilter::default())
    }
    pub fn target(entity: &EntityRef) -> ActionQuery {
        ActionQuery::Scan(Source::Target(entity.clone()), ActionFilter::default())
    }
    pub fn action_object(entity: &EntityRef) -> ActionQuery {
        ActionQuery::Scan(Source::ActionObject(entity.clone()), ActionFilter::default())
    }
    /// Matches nothing; the identity of [`ActionQuery::union`].
    pub fn none() -> ActionQuery {
        ActionQuery::Union(vec![])
    }

    pub fn public(self) -> ActionQuery {
        self.refine(|f| f.public_only = true)
    }
    pub fn since(self, timestamp: Timestamp) -> ActionQuery {
        self.refine(|f| f.since = Some(f.since.map_or(timestamp, |s| s.max(timestamp))))
    }
    pub fn until(self, timestamp: Timestamp) -> ActionQuery {
        self.refine(|f| f.until = Some(f.until.map_or(timestamp, |u| u.min(timestamp))))
    }
    pub fn after(self, id: ActionId) -> ActionQuery {
        self.refine(|f| f.after_id = Some(f.after_id.map_or(id, |a| a.max(id))))
    }
    pub fn verbs<I, S>(self, verbs: I) -> ActionQuery
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let verbs: BTreeSet<String> = verbs.into_iter().map(Into::into).collect();
        self.refine(move |f| {
            f.verbs = Some(match f.verbs.take() {
                Some(existing) => existing.intersection(&verbs).cloned().collect(),
                None => verbs,
            })
        })
    }
    pub fn exclude_verbs<I, S>(self, verbs: I) -> ActionQuery
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let verbs: Vec<String> = verbs.into_iter().map(Into::into).collect();
        self.refine(move |f| f.exclude_verbs.extend(verbs))
    }

    pub fn union(self, other: ActionQuery) -> ActionQuery {
        match (self, other) {
            (ActionQuery::Union(mut left), ActionQuery::Union(right)) => {
                left.extend(right);
                ActionQuery::Union(left)
            }
            (ActionQuery::Union(mut left), other) => {
                left.push(other);
                ActionQuery::Union(left)
            }
            (this, ActionQuery::Union(mut right)) => {
                right.insert(0, this);
                ActionQuery::Union(right)
            }
            (this, other) => ActionQuery::Union(vec![this, other]),
        }
    }
    pub fn intersect(self, other: ActionQuery) -> ActionQuery {
        ActionQuery::Intersect(Box::new(self), Box::new(other))
    }
    pub fn exclude(self, other: ActionQuery) -> ActionQuery {
        ActionQuery::Exclude(Box::new(self), Box::new(other))
    }

    /// Tightens the filter of a scan in place, or wraps any other query.
    fn refine(self, f: impl FnOnce(&mut ActionFilter)) -> ActionQuery {
        match self {
            ActionQuery::Scan(source, mut filter) => {
                f(&mut filter);
                ActionQuery::Scan(source, filter)
            }
            ActionQuery::Filter(inner, mut filter) => {
                f(&mut filter);
                ActionQuery::Filter(inner, filter)
            }
            other => {
                let mut filter = ActionFilter::default();
                f(&mut filter);
                ActionQuery::Filter(Box::new(other), filter)
            }
        }
    }
}
