use std::sync::Arc;

use anyhow::{Context, Result};
use minicbor::{Decode, Encode};
use tracing::{debug, warn};

use crate::activity_stream::entity::EntityRef;
use crate::activity_stream::model::{Action, ActionId};

use super::batch::BatchMap;
use super::kv::KeyValueStore;

/// How much of a feed one session has consumed, plus the batch clusters it
/// has already rendered. Persisted as a single value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct CursorState {
    #[n(0)]
    pub last_processed: Option<ActionId>,
    #[n(1)]
    pub last_activity_count: Option<u64>,
    #[n(2)]
    pub batches: BatchMap,
}

impl CursorState {
    /// State right after viewing the first page of `stream`.
    pub fn start(stream: &[Action]) -> CursorState {
        CursorState {
            last_processed: Some(newest_id(stream)),
            last_activity_count: Some(stream.len() as u64),
            batches: BatchMap::default(),
        }
    }

    /// A count without a processed id is left over from an older session
    /// layout and does not count as a cursor.
    pub fn is_established(&self) -> bool {
        self.last_processed.is_some() && self.last_activity_count.is_some()
    }

    /// Moves the cursor to the head of `stream`. Never moves backwards.
    pub fn advance(&mut self, stream: &[Action]) {
        let head = newest_id(stream);
        self.last_processed = Some(self.last_processed.map_or(head, |last| last.max(head)));
        self.last_activity_count = Some(stream.len() as u64);
    }
}

/// Highest id in the stream; ids start at 1 so 0 means "nothing yet".
fn newest_id(stream: &[Action]) -> ActionId {
    stream
        .iter()
        .map(|action| action.id)
        .max()
        .unwrap_or(ActionId(0))
}

/// Which stream of a user a cursor walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedView {
    /// The merged "following" feed.
    Following,
    /// The user's own actions.
    Personal,
}

/// Session-scoped cursor persistence, one key per viewer and view.
#[derive(Clone)]
pub struct CursorStore {
    sessions: Arc<dyn KeyValueStore>,
}

impl CursorStore {
    pub fn new(sessions: Arc<dyn KeyValueStore>) -> CursorStore {
        CursorStore { sessions }
    }
    pub fn key(user: &EntityRef, view: FeedView) -> String {
        match view {
            FeedView::Following => format!("cursor:{user}"),
            FeedView::Personal => format!("cursor:{user}:perso"),
        }
    }
    /// Missing or unreadable state is a fresh feed.
    pub fn load(&self, user: &EntityRef, view: FeedView) -> Result<CursorState> {
        let key = CursorStore::key(user, view);
        let Some(bytes) = self.sessions.get(&key)? else {
            return Ok(CursorState::default());
        };
        match minicbor::decode(&bytes) {
            Ok(state) => Ok(state),
            Err(error) => {
                warn!(target: "cursor", %key, %error, "resetting undecodable cursor");
                Ok(CursorState::default())
            }
        }
    }
    pub fn save(&self, user: &EntityRef, view: FeedView, state: &CursorState) -> Result<()> {
        let bytes = minicbor::to_vec(state).context("unable to encode cursor")?;
        debug!(
            target: "cursor",
            %user,
            ?view,
            last_processed = ?state.last_processed,
            count = ?state.last_activity_count,
            clusters = state.batches.len(),
            "saved cursor"
        );
        self.sessions.set(&CursorStore::key(user, view), bytes)
    }
    pub fn reset(&self, user: &EntityRef, view: FeedView) -> Result<()> {
        self.sessions.delete(&CursorStore::key(user, view))
    }
}
