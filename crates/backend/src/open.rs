//! Keyless last-resort backend (the "open" tier)
//!
//! Talks to public, unauthenticated generation endpoints. Output quality is
//! lower and source-image edits are not supported, but the tier has no
//! credentials to exhaust, so the fallback chain always attempts it.

use std::time::Duration;

use reqwest::Url;
use tracing::debug;

use crate::error::{BackendError, Result};
use crate::gemini::strip_code_fences;
use crate::session::content_type;
use crate::types::{Asset, GenerationRequest, RequestKind};
use crate::{Backend, GenerateFuture, http_error, transport_error};

pub const DEFAULT_IMAGE_URL: &str = "https://image.pollinations.ai";
pub const DEFAULT_TEXT_URL: &str = "https://text.pollinations.ai";

/// Public keyless image/text endpoints.
pub struct OpenBackend {
    http: reqwest::Client,
    image_url: String,
    text_url: String,
    timeout: Duration,
}

impl OpenBackend {
    pub fn new(
        http: reqwest::Client,
        image_url: impl Into<String>,
        text_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            image_url: image_url.into(),
            text_url: text_url.into(),
            timeout,
        }
    }

    /// Build the request URL for `request`, percent-encoding the prompt as a path segment.
    fn url_for(&self, request: &GenerationRequest) -> Result<Url> {
        let base = match request.kind {
            RequestKind::Image { .. } => &self.image_url,
            RequestKind::Text { .. } => &self.text_url,
        };
        let mut url = Url::parse(base)
            .map_err(|e| BackendError::NotConfigured(format!("invalid open backend url {base}: {e}")))?;

        let prompt = match &request.kind {
            RequestKind::Image { options, .. } => match &options.negative_prompt {
                Some(negative) if !negative.trim().is_empty() => {
                    format!("{}, without {}", request.prompt, negative.trim())
                }
                _ => request.prompt.clone(),
            },
            RequestKind::Text { schema: Some(schema) } => format!(
                "{}\n\nRespond only with JSON matching this schema: {schema}",
                request.prompt
            ),
            RequestKind::Text { schema: None } => request.prompt.clone(),
        };

        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| BackendError::NotConfigured(format!("open backend url {base} cannot be a base")))?;
            segments.pop_if_empty();
            if matches!(request.kind, RequestKind::Image { .. }) {
                segments.push("prompt");
            }
            segments.push(&prompt);
        }

        if let RequestKind::Image {
            aspect_ratio,
            options,
        } = &request.kind
        {
            let (width, height) = aspect_ratio.dimensions();
            let mut query = url.query_pairs_mut();
            query
                .append_pair("width", &width.to_string())
                .append_pair("height", &height.to_string())
                .append_pair("nologo", "true");
            if let Some(seed) = options.seed {
                query.append_pair("seed", &seed.to_string());
            }
        }

        Ok(url)
    }

    async fn run(&self, request: &GenerationRequest) -> Result<Asset> {
        if let RequestKind::Image { options, .. } = &request.kind
            && options.source_image.is_some()
        {
            debug!("open backend ignores source image, generating from prompt only");
        }

        let url = self.url_for(request)?;
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| transport_error("open backend request failed", e))?;

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
                    .map_err(|e| transport_error("reading open image body", e))?;
                if data.is_empty() {
                    return Err(BackendError::InvalidResponse("empty image body".into()));
                }
                Ok(Asset::Image {
                    mime_type,
                    data: data.to_vec(),
                })
            }
            RequestKind::Text { schema } => {
                let text = response
                    .text()
                    .await
                    .map_err(|e| transport_error("reading open text body", e))?;
                if schema.is_none() {
                    return Ok(Asset::Text(text));
                }
                serde_json::from_str(strip_code_fences(&text))
                    .map(Asset::Json)
                    .map_err(|e| BackendError::InvalidResponse(format!("structured output is not JSON: {e}")))
            }
        }
    }
}

impl Backend for OpenBackend {
    fn id(&self) -> &str {
        "open"
    }

    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> GenerateFuture<'a> {
        Box::pin(self.run(request))
    }
}
