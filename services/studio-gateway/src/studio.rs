//! Consumer-facing facade
//!
//! The calls a UI makes: generate an image or text through the fallback
//! chain, inspect and reset credential status, and hand the web tier a
//! session token.

use std::sync::Arc;

use backend::{AspectRatio, Asset, GenerationRequest, ImageOptions, SessionBackend};
use common::Secret;
use key_pool::{CredentialStatusView, KeyPool, PoolStats};

use crate::error::GenerationError;
use crate::fallback::FallbackChain;

/// Generated image bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAsset {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Text answer; `Json` when a schema was supplied.
#[derive(Debug, Clone, PartialEq)]
pub enum TextOutput {
    Text(String),
    Json(serde_json::Value),
}

pub struct Studio {
    chain: FallbackChain,
    pool: Arc<KeyPool>,
    web: Arc<SessionBackend>,
}

impl Studio {
    pub fn new(chain: FallbackChain, pool: Arc<KeyPool>, web: Arc<SessionBackend>) -> Self {
        Self { chain, pool, web }
    }

    pub async fn generate_image(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
        options: ImageOptions,
    ) -> Result<ImageAsset, GenerationError> {
        let request = GenerationRequest::image(validated(prompt)?, aspect_ratio, options);
        match self.chain.generate(&request).await? {
            Asset::Image { mime_type, data } => Ok(ImageAsset { mime_type, data }),
            other => Err(unexpected("image", &other)),
        }
    }

    pub async fn generate_text(
        &self,
        prompt: &str,
        schema: Option<serde_json::Value>,
    ) -> Result<TextOutput, GenerationError> {
        let request = GenerationRequest::text(validated(prompt)?, schema);
        match self.chain.generate(&request).await? {
            Asset::Text(text) => Ok(TextOutput::Text(text)),
            Asset::Json(value) => Ok(TextOutput::Json(value)),
            other => Err(unexpected("text", &other)),
        }
    }

    pub async fn list_credential_status(&self) -> Vec<CredentialStatusView> {
        self.pool.list_status().await
    }

    pub async fn reset_all(&self) {
        self.pool.reset_all().await;
    }

    pub async fn reset_one(&self, name: &str) -> key_pool::Result<()> {
        self.pool.reset_one(name).await
    }

    pub async fn stats(&self) -> PoolStats {
        self.pool.stats().await
    }

    pub async fn pool_health(&self) -> serde_json::Value {
        self.pool.health().await
    }

    pub fn set_web_session(&self, token: Secret<String>) {
        self.web.set_session(token);
    }

    pub fn clear_web_session(&self) {
        self.web.clear_session();
    }

    pub fn web_session_ready(&self) -> bool {
        backend::Backend::is_ready(self.web.as_ref())
    }

    /// Stop pool rotation at its next attempt; used while draining on shutdown.
    pub fn cancel_pending(&self) {
        self.pool.cancel();
    }

    pub fn tiers(&self) -> Vec<&str> {
        self.chain.tier_ids()
    }
}

fn validated(prompt: &str) -> Result<&str, GenerationError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(GenerationError::InvalidRequest(
            "prompt must not be empty".into(),
        ));
    }
    Ok(prompt)
}

fn unexpected(expected: &'static str, got: &Asset) -> GenerationError {
    GenerationError::UnexpectedAsset {
        tier: "fallback".into(),
        expected,
        got: match got {
            Asset::Image { .. } => "image",
            Asset::Text(_) => "text",
            Asset::Json(_) => "json",
        },
    }
}
