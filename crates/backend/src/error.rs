//! Error types for generation backends

/// Errors from a single generation attempt against one backend.
///
/// `Http` keeps the upstream status and body verbatim: the credential pool
/// classifies quota failures from this message text, so the Display form
/// must contain both the status code and the body.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend not configured: {0}")]
    NotConfigured(String),

    #[error("unsupported request: {0}")]
    Unsupported(String),

    #[error("upstream returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("credentials exhausted: {0}")]
    Exhausted(String),

    /// Failed for a reason other than credential quota; not retried.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl BackendError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::NotConfigured(_) => "not_configured",
            BackendError::Unsupported(_) => "unsupported",
            BackendError::Http { .. } => "http",
            BackendError::Transport(_) => "transport",
            BackendError::InvalidResponse(_) => "invalid_response",
            BackendError::Exhausted(_) => "exhausted",
            BackendError::Rejected(_) => "rejected",
        }
    }
}

/// Result alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;
