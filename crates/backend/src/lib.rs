//! Generation backend abstraction
//!
//! Defines the `Backend` trait that decouples the fallback chain from the
//! concrete generation service. Three backends ship with the crate:
//! - `GeminiClient`: the primary, key-authenticated generative API. It is not a
//!   `Backend` on its own; the gateway wraps it with the credential pool.
//! - `SessionBackend`: the alternate "web" path, usable only once a session
//!   token has been supplied out-of-band.
//! - `OpenBackend`: keyless, lower quality, always reachable.

pub mod error;
pub mod gemini;
pub mod open;
pub mod session;
pub mod types;

pub use error::{BackendError, Result};
pub use gemini::GeminiClient;
pub use open::OpenBackend;
pub use session::SessionBackend;
pub use types::{AspectRatio, Asset, GenerationRequest, ImageOptions, InlineImage, RequestKind};

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by `Backend::generate`.
pub type GenerateFuture<'a> = Pin<Box<dyn Future<Output = Result<Asset>> + Send + 'a>>;

/// One tier of the generation fallback chain.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Backend>`).
pub trait Backend: Send + Sync {
    /// Tier name for logging, metrics and aggregated error messages
    /// (e.g. "primary", "web", "open").
    fn id(&self) -> &str;

    /// Whether the backend can be attempted at all.
    ///
    /// Backends that need out-of-band initialization (a browser session, a
    /// token pasted by an operator) return false until that happens. The
    /// fallback chain skips unready backends and records "not configured".
    fn is_ready(&self) -> bool {
        true
    }

    /// Run one generation request to completion.
    ///
    /// Implementations must only return `Ok` with a fully materialized asset;
    /// a failure never yields partial output.
    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> GenerateFuture<'a>;
}

/// Map a reqwest transport failure into a `BackendError`.
pub(crate) fn transport_error(context: &str, err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Transport(format!("{context}: timed out"))
    } else {
        BackendError::Transport(format!("{context}: {err}"))
    }
}

/// Read a non-success response into `BackendError::Http`.
pub(crate) async fn http_error(response: reqwest::Response) -> BackendError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));
    BackendError::Http { status, body }
}
