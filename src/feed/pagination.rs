//! Offset pages and incremental polls over one composed stream.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::activity_stream::model::{Action, ActionId};
use crate::config::FeedConfig;

use super::batch::{BatchGrouper, BatchMap};
use super::composer::newest_first;
use super::cursor::CursorState;

/// One rendered row: a representative action and whatever it subsumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedEntry {
    #[serde(flatten)]
    pub action: Action,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub batched: Vec<Action>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedPage {
    pub items: Vec<FeedEntry>,
    pub more: bool,
}

/// Result of an incremental poll. `state` is what the session should hold
/// if the caller commits to the poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub entries: Vec<FeedEntry>,
    pub state: CursorState,
}

pub struct Paginator<'a> {
    stream: &'a [Action],
    config: &'a FeedConfig,
    by_id: HashMap<ActionId, &'a Action>,
}

impl<'a> Paginator<'a> {
    pub fn new(stream: &'a [Action], config: &'a FeedConfig) -> Paginator<'a> {
        let by_id = stream.iter().map(|action| (action.id, action)).collect();
        Paginator {
            stream,
            config,
            by_id,
        }
    }

    /// Slices `[offset, offset + limit)` out of the stream and batches it.
    ///
    /// Offset 0 starts a fresh view: the cursor moves to the stream head and
    /// earlier clusters are forgotten. Later offsets keep adding to the
    /// clusters of the view, so nothing rendered as batched resurfaces.
    pub fn page(&self, state: &mut CursorState, offset: usize, limit: usize) -> FeedPage {
        if offset == 0 {
            *state = CursorState::start(self.stream);
        } else if !state.is_established() {
            let batches = std::mem::take(&mut state.batches);
            *state = CursorState {
                batches,
                ..CursorState::start(self.stream)
            };
        }

        let start = offset.min(self.stream.len());
        let end = offset.saturating_add(limit).min(self.stream.len());
        let window = &self.stream[start..end];
        if window.is_empty() {
            return FeedPage::default();
        }

        BatchGrouper::new(self.stream, self.config).group(window, &mut state.batches);
        let items = self.entries(window, &state.batches);
        let more = end < self.stream.len();
        debug!(target: "feed", offset, limit, rows = items.len(), more, "paged");
        FeedPage { items, more }
    }

    /// Everything newer than the cursor, minus toggle-style verbs and
    /// anything a cluster already covers. The input state is not touched.
    pub fn poll(&self, state: &CursorState) -> PollOutcome {
        let last = state.last_processed.unwrap_or(ActionId(0));
        let unprocessed: Vec<Action> = self
            .stream
            .iter()
            .filter(|action| action.id > last)
            .filter(|action| !self.config.incremental_excluded_verbs.contains(&action.verb))
            .cloned()
            .collect();

        let mut next = state.clone();
        BatchGrouper::new(&unprocessed, self.config).group(&unprocessed, &mut next.batches);
        let entries = self.entries(&unprocessed, &next.batches);
        next.advance(self.stream);
        debug!(
            target: "feed",
            %last,
            unprocessed = unprocessed.len(),
            new = entries.len(),
            "polled"
        );
        PollOutcome {
            entries,
            state: next,
        }
    }

    fn entries(&self, window: &[Action], batches: &BatchMap) -> Vec<FeedEntry> {
        window
            .iter()
            .filter(|action| !batches.is_subsumed(action.id))
            .map(|action| {
                let mut batched: Vec<Action> = batches
                    .members(action.id)
                    .into_iter()
                    .flatten()
                    .filter_map(|id| self.by_id.get(id).map(|member| (*member).clone()))
                    .collect();
                batched.sort_by(newest_first);
                FeedEntry {
                    action: action.clone(),
                    batched,
                }
            })
            .collect()
    }
}
