//! Primary generation API client (Gemini `generateContent`)
//!
//! Stateless with respect to credentials: every call takes the API key to
//! use, so the credential pool decides which key goes out on which attempt.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{BackendError, Result};
use crate::types::{Asset, GenerationRequest, RequestKind};
use crate::{http_error, transport_error};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";

/// HTTP client for the primary generation API.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    image_model: String,
    text_model: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        image_model: impl Into<String>,
        text_model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            image_model: image_model.into(),
            text_model: text_model.into(),
            timeout,
        }
    }

    /// Run `request` authenticated with `api_key`.
    ///
    /// Non-2xx responses come back as `BackendError::Http` with the body
    /// intact so quota markers ("RESOURCE_EXHAUSTED", "PerDay") survive for
    /// classification.
    pub async fn generate_with_key(&self, api_key: &str, request: &GenerationRequest) -> Result<Asset> {
        let model = match request.kind {
            RequestKind::Image { .. } => &self.image_model,
            RequestKind::Text { .. } => &self.text_model,
        };
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        );
        let body = build_body(request);

        debug!(model = %model, kind = request.kind_label(), "sending generateContent request");

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("generateContent request failed", e))?;

        if !response.status().is_success() {
            return Err(http_error(response).await);
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("malformed generateContent body: {e}")))?;

        match &request.kind {
            RequestKind::Image { .. } => extract_image(parsed),
            RequestKind::Text { schema } => extract_text(parsed, schema.is_some()),
        }
    }
}

/// Build the `generateContent` JSON body for a request.
fn build_body(request: &GenerationRequest) -> Value {
    match &request.kind {
        RequestKind::Image {
            aspect_ratio,
            options,
        } => {
            let prompt = match &options.negative_prompt {
                Some(negative) if !negative.trim().is_empty() => {
                    format!("{}\n\nAvoid: {}", request.prompt, negative.trim())
                }
                _ => request.prompt.clone(),
            };
            let mut parts = vec![json!({ "text": prompt })];
            if let Some(source) = &options.source_image {
                parts.push(json!({
                    "inlineData": { "mimeType": source.mime_type, "data": source.data }
                }));
            }
            let mut generation_config = json!({
                "responseModalities": ["IMAGE"],
                "imageConfig": { "aspectRatio": aspect_ratio.as_str() }
            });
            if let Some(seed) = options.seed {
                generation_config["seed"] = json!(seed);
            }
            json!({
                "contents": [{ "role": "user", "parts": parts }],
                "generationConfig": generation_config
            })
        }
        RequestKind::Text { schema } => {
            let mut body = json!({
                "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }]
            });
            if let Some(schema) = schema {
                body["generationConfig"] = json!({
                    "responseMimeType": "application/json",
                    "responseSchema": schema
                });
            }
            body
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GenerateResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
    }

    /// Why no usable output came back, for the error message.
    fn empty_reason(&self) -> String {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return format!("prompt blocked: {reason}");
        }
        match self
            .candidates
            .first()
            .and_then(|c| c.finish_reason.as_deref())
        {
            Some(reason) => format!("no output (finish reason {reason})"),
            None => "no candidates in response".to_string(),
        }
    }
}

fn extract_image(response: GenerateResponse) -> Result<Asset> {
    let inline = response.parts().find_map(|p| p.inline_data.as_ref());
    let Some(inline) = inline else {
        return Err(BackendError::InvalidResponse(response.empty_reason()));
    };
    let data = STANDARD
        .decode(inline.data.as_bytes())
        .map_err(|e| BackendError::InvalidResponse(format!("image payload is not base64: {e}")))?;
    Ok(Asset::Image {
        mime_type: inline.mime_type.clone(),
        data,
    })
}

fn extract_text(response: GenerateResponse, wants_json: bool) -> Result<Asset> {
    let text: String = response.parts().filter_map(|p| p.text.as_deref()).collect();
    if text.trim().is_empty() {
        return Err(BackendError::InvalidResponse(response.empty_reason()));
    }
    if !wants_json {
        return Ok(Asset::Text(text));
    }
    serde_json::from_str(strip_code_fences(&text))
        .map(Asset::Json)
        .map_err(|e| BackendError::InvalidResponse(format!("structured output is not JSON: {e}")))
}

/// Strip a surrounding markdown code fence (```json ... ```), if present.
pub(crate) fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    // Drop the info string ("json") on the opening fence line
    match rest.find('\n') {
        Some(idx) => rest[idx + 1..].trim(),
        None => rest.trim(),
    }
}
