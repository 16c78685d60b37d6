//! Activity streams: who did what to whom, who follows whom, and the merged,
//! batched feeds that result.

pub mod activity_stream;
pub mod config;
pub mod error;
pub mod feed;

pub use activity_stream::entity::{EntityKind, EntityRef, Followable, Registry};
pub use activity_stream::model::{Action, ActionId, Follow, FollowScope, NewAction};
pub use activity_stream::{ActivityStream, FollowOptions, Principal, UnfollowOptions};
pub use config::{Config, FeedConfig};
pub use error::FeedError;
