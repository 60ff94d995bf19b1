//! Session-authenticated alternate backend (the "web" tier)
//!
//! Reachable only after a session token has been supplied out-of-band, by an
//! operator through the admin API or from config at startup. Until then
//! `is_ready()` is false and the fallback chain skips it. A 401/403 from the
//! endpoint means the session has expired; the token is dropped so later
//! requests skip the tier instead of failing against it again.

use std::time::Duration;

use common::Secret;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{BackendError, Result};
use crate::gemini::strip_code_fences;
use crate::types::{Asset, GenerationRequest, RequestKind};
use crate::{Backend, GenerateFuture, http_error, transport_error};

/// Alternate generation endpoint driven by a user session.
pub struct SessionBackend {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    session: RwLock<Option<Secret<String>>>,
}

#[derive(Debug, Deserialize)]
struct TextReply {
    text: String,
}

impl SessionBackend {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            timeout,
            session: RwLock::new(None),
        }
    }

    /// Install a session token, making the backend ready.
    pub fn set_session(&self, token: Secret<String>) {
        *self.session.write() = Some(token);
        info!("web session installed");
    }

    /// Forget the session token.
    pub fn clear_session(&self) {
        *self.session.write() = None;
        info!("web session cleared");
    }

    async fn run(&self, request: &GenerationRequest) -> Result<Asset> {
        let token = self
            .session
            .read()
            .clone()
            .ok_or_else(|| BackendError::NotConfigured("no web session has been supplied".into()))?;

        let payload = match &request.kind {
            RequestKind::Image {
                aspect_ratio,
                options,
            } => {
                let (width, height) = aspect_ratio.dimensions();
                json!({
                    "kind": "image",
                    "prompt": request.prompt,
                    "aspect_ratio": aspect_ratio.as_str(),
                    "width": width,
                    "height": height,
                    "negative_prompt": options.negative_prompt,
                    "seed": options.seed,
                    "source_image": options.source_image,
                })
            }
            RequestKind::Text { schema } => json!({
                "kind": "text",
                "prompt": request.prompt,
                "schema": schema,
            }),
        };

        let url = format!("{}/generate", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(token.expose())
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error("web session request failed", e))?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            warn!(status, "web session rejected, clearing it");
            self.clear_session();
            return Err(BackendError::NotConfigured(format!(
                "web session rejected with HTTP {status}"
            )));
        }
        if !response.status().is_success() {
            return Err(http_error(response).await);
        }

        match &request.kind {
            RequestKind::Image { .. } => {
                let mime_type = content_type(&response);
                if !mime_type.starts_with("image/") {
                    return Err(BackendError::InvalidResponse(format!(
                        "expected image content, got {mime_type}"
                    )));
                }
                let data = response
                    .bytes()
                    .await
                    .map_err(|e| transport_error("reading web image body", e))?;
                Ok(Asset::Image {
                    mime_type,
                    data: data.to_vec(),
                })
            }
            RequestKind::Text { schema } => {
                let reply: TextReply = response
                    .json()
                    .await
                    .map_err(|e| BackendError::InvalidResponse(format!("malformed web text reply: {e}")))?;
                if schema.is_none() {
                    return Ok(Asset::Text(reply.text));
                }
                serde_json::from_str(strip_code_fences(&reply.text))
                    .map(Asset::Json)
                    .map_err(|e| BackendError::InvalidResponse(format!("structured output is not JSON: {e}")))
            }
        }
    }
}

impl Backend for SessionBackend {
    fn id(&self) -> &str {
        "web"
    }

    fn is_ready(&self) -> bool {
        self.session.read().is_some()
    }

    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> GenerateFuture<'a> {
        Box::pin(self.run(request))
    }
}

/// Content type of a response without parameters, defaulting to octet-stream.
pub(crate) fn content_type(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}
