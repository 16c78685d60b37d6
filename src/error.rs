use thiserror::Error;

/// Domain failures surfaced to callers.
///
/// These travel inside [`anyhow::Error`]; use `downcast_ref::<FeedError>()`
/// to tell a rejected request apart from a storage fault.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("entity kind '{0}' is not registered as actionable")]
    NotActionable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{actor} is not allowed to modify action {action}")]
    PermissionDenied { actor: String, action: String },

    #[error("invalid entity reference '{0}': expected <kind>:<id>")]
    InvalidEntity(String),
}
