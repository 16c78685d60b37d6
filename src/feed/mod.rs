//! Turning recorded actions into pages a viewer can read.

pub mod batch;
pub mod cache;
pub mod composer;
pub mod cursor;
pub mod kv;
pub mod pagination;

pub use batch::{BatchGrouper, BatchMap};
pub use cache::FeedCache;
pub use composer::StreamComposer;
pub use cursor::{CursorState, CursorStore, FeedView};
pub use kv::{KeyValueStore, MemoryStore, PartitionStore};
pub use pagination::{FeedEntry, FeedPage, Paginator, PollOutcome};
