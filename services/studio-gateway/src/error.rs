//! Generation error types
//!
//! Per-tier failures are absorbed by the fallback chain; callers only ever
//! see one aggregated `GenerationError`.

use std::fmt;

use thiserror::Error;

/// Why one tier of the fallback chain did not produce an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierFailure {
    pub tier: String,
    pub reason: String,
}

impl fmt::Display for TierFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.tier, self.reason)
    }
}

/// Failure of a consumer-facing generation call.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("all generation backends failed ({})", join_failures(.0))]
    AllTiersFailed(Vec<TierFailure>),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A backend answered with the wrong kind of asset.
    #[error("backend {tier} returned {got}, expected {expected}")]
    UnexpectedAsset {
        tier: String,
        expected: &'static str,
        got: &'static str,
    },
}

impl GenerationError {
    /// Short label for metrics and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::AllTiersFailed(_) => "all_backends_failed",
            GenerationError::InvalidRequest(_) => "invalid_request",
            GenerationError::UnexpectedAsset { .. } => "unexpected_asset",
        }
    }
}

fn join_failures(failures: &[TierFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
