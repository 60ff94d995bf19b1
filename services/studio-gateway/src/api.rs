//! Public generation API handlers
//!
//! JSON in; images come back as raw bytes with their content type, text as
//! JSON. Failures use the error body
//! `{"error":{"type":"...","message":"...","request_id":"req_..."}}`.

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use backend::{AspectRatio, ImageOptions};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::error::GenerationError;
use crate::metrics;
use crate::studio::{Studio, TextOutput};

/// Shared state for the public listener
#[derive(Clone)]
pub struct ApiState {
    pub studio: Arc<Studio>,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

#[derive(Debug, Deserialize)]
pub struct ImageBody {
    pub prompt: String,
    #[serde(default = "default_aspect_ratio", alias = "aspectRatio")]
    pub aspect_ratio: AspectRatio,
    #[serde(flatten)]
    pub options: ImageOptions,
}

#[derive(Debug, Deserialize)]
pub struct TextBody {
    pub prompt: String,
    #[serde(default)]
    pub schema: Option<serde_json::Value>,
}

fn default_aspect_ratio() -> AspectRatio {
    AspectRatio::Square
}

pub fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

/// JSON error response: {"error":{"type":"...","message":"...","request_id":"req_..."}}
pub fn error_response(status: StatusCode, error_type: &str, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": error_type,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn generation_error_response(err: &GenerationError, request_id: &str) -> Response {
    let status = match err {
        GenerationError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        GenerationError::AllTiersFailed(_) | GenerationError::UnexpectedAsset { .. } => {
            StatusCode::BAD_GATEWAY
        }
    };
    error_response(status, err.kind(), &err.to_string(), request_id)
}

/// POST /v1/images
#[instrument(skip_all, fields(request_id))]
pub async fn generate_image(
    State(state): State<ApiState>,
    body: Result<Json<ImageBody>, JsonRejection>,
) -> Response {
    let request_id = new_request_id();
    tracing::Span::current().record("request_id", request_id.as_str());
    let started = Instant::now();

    let response = match body {
        Err(rejection) => error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            &rejection.body_text(),
            &request_id,
        ),
        Ok(Json(body)) => {
            info!(aspect_ratio = %body.aspect_ratio, "image requested");
            match state
                .studio
                .generate_image(&body.prompt, body.aspect_ratio, body.options)
                .await
            {
                Ok(image) => (
                    StatusCode::OK,
                    [
                        (CONTENT_TYPE, image.mime_type),
                        (
                            axum::http::HeaderName::from_static("x-request-id"),
                            request_id.clone(),
                        ),
                    ],
                    image.data,
                )
                    .into_response(),
                Err(e) => {
                    warn!(error = %e, "image generation failed");
                    generation_error_response(&e, &request_id)
                }
            }
        }
    };

    metrics::record_request("images", response.status().as_u16(), started.elapsed().as_secs_f64());
    response
}

/// POST /v1/text
#[instrument(skip_all, fields(request_id))]
pub async fn generate_text(
    State(state): State<ApiState>,
    body: Result<Json<TextBody>, JsonRejection>,
) -> Response {
    let request_id = new_request_id();
    tracing::Span::current().record("request_id", request_id.as_str());
    let started = Instant::now();

    let response = match body {
        Err(rejection) => error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            &rejection.body_text(),
            &request_id,
        ),
        Ok(Json(body)) => {
            info!(structured = body.schema.is_some(), "text requested");
            match state.studio.generate_text(&body.prompt, body.schema).await {
                Ok(output) => {
                    let json = match output {
                        TextOutput::Text(text) => serde_json::json!({
                            "format": "text",
                            "text": text,
                            "request_id": request_id,
                        }),
                        TextOutput::Json(data) => serde_json::json!({
                            "format": "json",
                            "data": data,
                            "request_id": request_id,
                        }),
                    };
                    (
                        StatusCode::OK,
                        [(CONTENT_TYPE, "application/json")],
                        json.to_string(),
                    )
                        .into_response()
                }
                Err(e) => {
                    warn!(error = %e, "text generation failed");
                    generation_error_response(&e, &request_id)
                }
            }
        }
    };

    metrics::record_request("text", response.status().as_u16(), started.elapsed().as_secs_f64());
    response
}

/// GET /health
///
/// Always 200 while the process is up: the keyless tier keeps the gateway
/// serving even when the pool is unhealthy. `status` reports the pool.
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let pool = state.studio.pool_health().await;
    let status = if pool["status"] == "healthy" {
        "healthy"
    } else {
        "degraded"
    };
    let body = serde_json::json!({
        "status": status,
        "pool": pool,
        "web_session": state.studio.web_session_ready(),
        "tiers": state.studio.tiers(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    });
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// GET /metrics in Prometheus text exposition format.
pub async fn metrics_handler(State(state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
}
