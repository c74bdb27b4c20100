//! Error types for pool operations

/// Errors from pool storage and maintenance.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The account database could not be read or written.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// A row or the table layout does not match the accounts contract.
    #[error("schema error: {0}")]
    Schema(String),

    #[error("token refresh failed: {0}")]
    Refresh(#[from] token_auth::Error),

    #[error("quota check failed: {0}")]
    Quota(String),

    #[error("account not found: {0}")]
    NotFound(String),

    #[error("a verification pass is already running")]
    CycleInProgress,
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
