mod action_repo;
mod follow_repo;
mod xindex;
mod xkey;

pub use action_repo::ActionStore;
pub use follow_repo::FollowRepo;
