//! The activity stream engine.
//!
//! [`ActivityStream`] owns the action store, the follow graph and the session
//! state kept for each viewer, and serves the feeds composed from them.

pub mod entity;
pub mod model;
pub mod notice_queue;
pub mod query;
pub mod repo;

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use fjall::Keyspace;
use jiff::Timestamp;
use tracing::{debug, info, warn};

use crate::config::{Config, FeedConfig};
use crate::error::FeedError;
use crate::feed::{
    CursorState, CursorStore, FeedCache, FeedEntry, FeedPage, FeedView, KeyValueStore, Paginator,
    PartitionStore, StreamComposer,
};

use self::entity::{EntityRef, Followable, Registry};
use self::model::{
    Action, ActionId, Follow, FollowId, FollowScope, NewAction, stored_precision,
};
use self::notice_queue::{Notice, NoticeQueue, Notifier};
use self::query::ActionQuery;
use self::repo::{ActionStore, FollowRepo};

#[derive(Debug, Clone)]
pub struct FollowOptions {
    pub scope: FollowScope,
    /// Empty for a plain follow.
    pub category: String,
    /// Record a follow action in the follower's stream.
    pub send_action: bool,
    /// Defaults to now.
    pub started: Option<Timestamp>,
}

impl Default for FollowOptions {
    fn default() -> Self {
        Self {
            scope: FollowScope::default(),
            category: String::new(),
            send_action: true,
            started: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UnfollowOptions {
    /// Empty removes every category.
    pub category: String,
    pub send_action: bool,
}

/// Who is asking to change an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user: EntityRef,
    /// Entities the user may act for, e.g. organizations they administer.
    pub manages: Vec<EntityRef>,
}

impl Principal {
    pub fn user(user: EntityRef) -> Principal {
        Principal {
            user,
            manages: vec![],
        }
    }
    fn may_modify(&self, action: &Action) -> bool {
        action.actor == self.user || self.manages.contains(&action.actor)
    }
}

pub struct ActivityStream {
    config: FeedConfig,
    registry: Registry,
    actions: ActionStore,
    follows: FollowRepo,
    notices: NoticeQueue,
    cache: FeedCache,
    cursors: CursorStore,
    notifier: Arc<dyn Notifier>,
}

impl ActivityStream {
    pub fn open(config: &Config) -> Result<ActivityStream> {
        let keyspace = fjall::Config::new(&config.data_dir)
            .open()
            .with_context(|| format!("unable to open {}", config.data_dir.display()))?;
        ActivityStream::new(keyspace, config.feed.clone())
    }

    /// Everything lives in `keyspace`; cache, sessions and notifications can
    /// be moved elsewhere with the `with_*` builders.
    pub fn new(keyspace: Keyspace, config: FeedConfig) -> Result<ActivityStream> {
        let registry = Registry::from_names(config.actionable.as_slice())?;
        let cache = FeedCache::new(Arc::new(PartitionStore::new(&keyspace, "feed_cache")?));
        let cursors = CursorStore::new(Arc::new(PartitionStore::new(&keyspace, "sessions")?));
        let notices = NoticeQueue::new(keyspace.clone())?;
        Ok(ActivityStream {
            registry,
            actions: ActionStore::new(keyspace.clone())?,
            follows: FollowRepo::new(keyspace)?,
            notifier: Arc::new(notices.clone()),
            notices,
            cache,
            cursors,
            config,
        })
    }
    pub fn with_cache_store(mut self, store: Arc<dyn KeyValueStore>) -> ActivityStream {
        self.cache = FeedCache::new(store);
        self
    }
    pub fn with_session_store(mut self, store: Arc<dyn KeyValueStore>) -> ActivityStream {
        self.cursors = CursorStore::new(store);
        self
    }
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> ActivityStream {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }
    pub fn actions(&self) -> &ActionStore {
        &self.actions
    }
    pub fn follows(&self) -> &FollowRepo {
        &self.follows
    }
    /// The persisted outbox, whether or not it is the active notifier.
    pub fn notice_queue(&self) -> &NoticeQueue {
        &self.notices
    }

    fn composer(&self) -> StreamComposer<'_> {
        StreamComposer::new(&self.actions, &self.follows, &self.config)
    }

    /// Creates the follow unless it exists. Only a new follow with
    /// `send_action` records an action or notifies anyone.
    pub fn follow(
        &self,
        user: &EntityRef,
        entity: &dyn Followable,
        options: FollowOptions,
    ) -> Result<Follow> {
        let target = entity.entity();
        self.registry.check(user)?;
        self.registry.check(&target)?;
        if let Some(existing) = self.follows.find_one(user, &target, &options.category)? {
            debug!(target: "follow", %user, entity = %target, "already following");
            return Ok(existing);
        }

        let follow = Follow {
            id: FollowId::new(),
            user: user.clone(),
            entity: target.clone(),
            scope: options.scope,
            category: options.category,
            started: stored_precision(options.started.unwrap_or_else(Timestamp::now))?,
        };
        self.follows.insert(follow.clone())?;
        info!(
            target: "follow",
            %user,
            entity = %target,
            category = %follow.category,
            "followed"
        );

        if options.send_action {
            let verb = match follow.category.as_str() {
                "" => self.config.follow_verb.clone(),
                category => format!("started {category}"),
            };
            let action = self.actions.record(
                NewAction::new(user.clone(), verb)
                    .target(target)
                    .at(follow.started)
                    .batchable(self.config.default_batch_minutes),
            )?;
            self.invalidate_audience(&action)?;
            if follow.category.is_empty() {
                self.notify_follow(user, entity);
            }
        }
        self.cache.invalidate(&FeedCache::feed_key(user))?;
        Ok(follow)
    }

    fn notify_follow(&self, user: &EntityRef, entity: &dyn Followable) {
        let Some(recipients) = entity.notification_recipients() else {
            debug!(target: "notice", entity = %entity.entity(), "notification suppressed");
            return;
        };
        if recipients.is_empty() {
            return;
        }
        let notice = Notice {
            recipients,
            kind: "follower".to_string(),
            context: entity.entity(),
            sender: user.clone(),
        };
        if let Err(error) = self.notifier.notify(notice) {
            warn!(target: "notice", %user, %error, "unable to send follow notice");
        }
    }

    /// Returns the number of follow rows removed.
    pub fn unfollow(
        &self,
        user: &EntityRef,
        entity: &dyn Followable,
        options: UnfollowOptions,
    ) -> Result<usize> {
        let target = entity.entity();
        self.registry.check(&target)?;
        let category = Some(options.category.as_str()).filter(|c| !c.is_empty());
        let removed = self.follows.remove(user, &target, category)?;
        if removed == 0 {
            return Ok(0);
        }
        info!(target: "follow", %user, entity = %target, removed, "unfollowed");

        if options.send_action {
            let verb = match category {
                None => self.config.unfollow_verb.clone(),
                Some(category) => format!("stopped {category}"),
            };
            let action = self
                .actions
                .record(NewAction::new(user.clone(), verb).target(target))?;
            self.invalidate_audience(&action)?;
        }
        self.cache.invalidate(&FeedCache::feed_key(user))?;
        Ok(removed)
    }

    /// An empty `category` matches a follow in any category.
    pub fn is_following(
        &self,
        user: &EntityRef,
        entity: &dyn Followable,
        category: &str,
    ) -> Result<bool> {
        let target = entity.entity();
        self.registry.check(&target)?;
        if category.is_empty() {
            return Ok(!self.follows.find_all(user, &target)?.is_empty());
        }
        Ok(self.follows.find_one(user, &target, category)?.is_some())
    }

    /// Entities `user` follows in any category, each listed once.
    pub fn following(&self, user: &EntityRef) -> Result<Vec<EntityRef>> {
        let mut seen = BTreeSet::new();
        Ok(self
            .follows
            .following(user)?
            .into_iter()
            .map(|follow| follow.entity)
            .filter(|entity| seen.insert(entity.clone()))
            .collect())
    }

    pub fn followers(&self, entity: &dyn Followable) -> Result<Vec<EntityRef>> {
        let target = entity.entity();
        self.registry.check(&target)?;
        let mut seen = BTreeSet::new();
        Ok(self
            .follows
            .followers(&target)?
            .into_iter()
            .map(|follow| follow.user)
            .filter(|user| seen.insert(user.clone()))
            .collect())
    }

    pub fn record(&self, new: NewAction) -> Result<Action> {
        self.registry.check(&new.actor)?;
        for entity in [new.target.as_ref(), new.action_object.as_ref()]
            .into_iter()
            .flatten()
        {
            self.registry.check(entity)?;
        }
        let action = self.actions.record(new)?;
        self.invalidate_audience(&action)?;
        Ok(action)
    }

    /// Drops the cached streams that `action` can appear in.
    fn invalidate_audience(&self, action: &Action) -> Result<()> {
        let mut viewers = BTreeSet::from([action.actor.clone()]);
        for entity in [
            Some(&action.actor),
            action.target.as_ref(),
            action.action_object.as_ref(),
        ]
        .into_iter()
        .flatten()
        {
            viewers.extend(self.follows.followers(entity)?.into_iter().map(|f| f.user));
        }
        for viewer in &viewers {
            self.cache.invalidate(&FeedCache::feed_key(viewer))?;
        }
        self.cache.invalidate(&FeedCache::actor_key(&action.actor))?;
        debug!(target: "cache", id = %action.id, viewers = viewers.len(), "invalidated feeds");
        Ok(())
    }

    /// Active action by id.
    pub fn action(&self, id: ActionId) -> Result<Action> {
        match self.actions.find_one(id)? {
            Some(action) if action.is_active() => Ok(action),
            _ => bail!(FeedError::NotFound(format!("action {id}"))),
        }
    }

    pub fn share_action(&self, user: &EntityRef, id: ActionId) -> Result<Action> {
        let shared = self.action(id)?;
        self.record(
            NewAction::new(user.clone(), self.config.share_verb.clone())
                .target(EntityRef::action(shared.id.0)),
        )
    }

    /// Soft-deletes the action and every share of it, all or nothing.
    pub fn delete_action(&self, principal: &Principal, id: ActionId) -> Result<usize> {
        let action = self.action(id)?;
        if !principal.may_modify(&action) {
            bail!(FeedError::PermissionDenied {
                actor: principal.user.to_string(),
                action: id.to_string(),
            });
        }
        let shares = self.actions.fetch(
            &ActionQuery::target(&EntityRef::action(id.0)).verbs([self.config.share_verb.as_str()]),
        )?;
        let mut ids = vec![action.id];
        ids.extend(shares.iter().map(|share| share.id));
        let deleted = self.actions.soft_delete(&ids)?;
        info!(target: "store", %id, by = %principal.user, deleted, "deleted action");

        self.invalidate_audience(&action)?;
        for share in &shares {
            self.invalidate_audience(share)?;
        }
        Ok(deleted)
    }

    /// The "following" feed of `user`, newest first, read through the cache.
    pub fn compose_feed(&self, user: &EntityRef) -> Result<Vec<Action>> {
        self.cache
            .get_or_compute(&FeedCache::feed_key(user), || self.composer().compose(user))
    }
    pub fn rebuild_cache(&self, user: &EntityRef) -> Result<Vec<Action>> {
        self.cache
            .rebuild(&FeedCache::feed_key(user), || self.composer().compose(user))
    }

    /// The public actions of `actor`, newest first, read through the cache.
    pub fn actor_stream(&self, actor: &EntityRef) -> Result<Vec<Action>> {
        self.cache.get_or_compute(&FeedCache::actor_key(actor), || {
            self.composer().compose_actor(actor)
        })
    }
    pub fn rebuild_actor_cache(&self, actor: &EntityRef) -> Result<Vec<Action>> {
        self.cache.rebuild(&FeedCache::actor_key(actor), || {
            self.composer().compose_actor(actor)
        })
    }

    pub fn page(&self, user: &EntityRef, offset: usize, limit: usize) -> Result<FeedPage> {
        self.page_view(user, FeedView::Following, offset, limit)
    }
    pub fn actor_page(&self, actor: &EntityRef, offset: usize, limit: usize) -> Result<FeedPage> {
        self.page_view(actor, FeedView::Personal, offset, limit)
    }

    /// Offset 0 starts a fresh view from a freshly composed stream; later
    /// offsets continue the stored view.
    fn page_view(
        &self,
        user: &EntityRef,
        view: FeedView,
        offset: usize,
        limit: usize,
    ) -> Result<FeedPage> {
        let (stream, mut state) = match (view, offset) {
            (FeedView::Following, 0) => (self.rebuild_cache(user)?, CursorState::default()),
            (FeedView::Personal, 0) => (self.rebuild_actor_cache(user)?, CursorState::default()),
            (FeedView::Following, _) => (self.compose_feed(user)?, self.cursors.load(user, view)?),
            (FeedView::Personal, _) => (self.actor_stream(user)?, self.cursors.load(user, view)?),
        };
        let page = Paginator::new(&stream, &self.config).page(&mut state, offset, limit);
        self.cursors.save(user, view, &state)?;
        Ok(page)
    }

    /// How many entries [`ActivityStream::poll_new_items`] would return.
    ///
    /// Without a cursor the current head becomes the baseline and nothing
    /// counts as new.
    pub fn poll_new_count(&self, user: &EntityRef) -> Result<usize> {
        let state = self.cursors.load(user, FeedView::Following)?;
        let stream = self.rebuild_cache(user)?;
        if !state.is_established() {
            self.cursors
                .save(user, FeedView::Following, &CursorState::start(&stream))?;
            return Ok(0);
        }
        Ok(Paginator::new(&stream, &self.config).poll(&state).entries.len())
    }

    /// New entries since the cursor, advancing it. Without a cursor this is
    /// the first page.
    pub fn poll_new_items(&self, user: &EntityRef) -> Result<Vec<FeedEntry>> {
        let state = self.cursors.load(user, FeedView::Following)?;
        if !state.is_established() {
            return Ok(self.page(user, 0, self.config.page_size)?.items);
        }
        let stream = self.rebuild_cache(user)?;
        let outcome = Paginator::new(&stream, &self.config).poll(&state);
        self.cursors.save(user, FeedView::Following, &outcome.state)?;
        Ok(outcome.entries)
    }

    /// Forgets the session cursor and recomposes the cached stream.
    pub fn rebuild(&self, user: &EntityRef) -> Result<()> {
        self.cursors.reset(user, FeedView::Following)?;
        let stream = self.rebuild_cache(user)?;
        info!(target: "feed", %user, len = stream.len(), "rebuilt feed");
        Ok(())
    }
}
