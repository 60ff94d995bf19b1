//! Error types for pool operations

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No credential could serve the request: the available set was empty or
    /// the retry bound was reached.
    #[error("all credentials exhausted: {0}")]
    Exhausted(String),

    /// The request failed for a reason that is not a credential problem.
    /// Surfaced on first occurrence, never retried.
    #[error("request failed on credential {credential}: {message}")]
    Request { credential: String, message: String },

    #[error("credential not found: {0}")]
    NotFound(String),

    #[error("status persistence error: {0}")]
    Persistence(String),

    #[error("request cancelled")]
    Cancelled,
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
