use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::activity_stream::entity::EntityRef;
use crate::activity_stream::model::Action;

use super::kv::KeyValueStore;

/// Advisory memo of composed streams. Invalidation is up to the caller.
#[derive(Clone)]
pub struct FeedCache {
    store: Arc<dyn KeyValueStore>,
}

impl FeedCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> FeedCache {
        FeedCache { store }
    }
    /// Key of the merged "following" stream of `user`.
    pub fn feed_key(user: &EntityRef) -> String {
        format!("feed:{user}")
    }
    /// Key of the stream of `actor`'s own actions.
    pub fn actor_key(actor: &EntityRef) -> String {
        format!("feed:{actor}:perso")
    }

    /// A value that cannot be decoded counts as a miss.
    pub fn get(&self, key: &str) -> Result<Option<Vec<Action>>> {
        let Some(bytes) = self.store.get(key)? else {
            debug!(target: "cache", key, "miss");
            return Ok(None);
        };
        match minicbor::decode::<Vec<Action>>(&bytes) {
            Ok(actions) => {
                debug!(target: "cache", key, len = actions.len(), "hit");
                Ok(Some(actions))
            }
            Err(error) => {
                warn!(target: "cache", key, %error, "dropping undecodable cache entry");
                Ok(None)
            }
        }
    }
    pub fn set(&self, key: &str, actions: &[Action]) -> Result<()> {
        let bytes = minicbor::to_vec(actions).context("unable to encode cached stream")?;
        self.store.set(key, bytes)
    }
    pub fn invalidate(&self, key: &str) -> Result<()> {
        self.store.delete(key)
    }
    pub fn get_or_compute(
        &self,
        key: &str,
        compute: impl FnOnce() -> Result<Vec<Action>>,
    ) -> Result<Vec<Action>> {
        if let Some(actions) = self.get(key)? {
            return Ok(actions);
        }
        self.rebuild(key, compute)
    }
    pub fn rebuild(
        &self,
        key: &str,
        compute: impl FnOnce() -> Result<Vec<Action>>,
    ) -> Result<Vec<Action>> {
        let actions = compute()?;
        self.set(key, &actions)?;
        debug!(target: "cache", key, len = actions.len(), "rebuilt");
        Ok(actions)
    }
}
