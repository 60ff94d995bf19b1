//! Admin API for credential pool management
//!
//! Runs on a separate listener (`server.admin_addr`) that should not be
//! exposed publicly. Secrets never appear in responses; keys are shown as
//! a masked hint.
//!
//! Endpoints:
//! - GET    /admin/credentials              : status of every credential
//! - GET    /admin/stats                    : per-state counts
//! - POST   /admin/credentials/reset        : reset every credential
//! - POST   /admin/credentials/{name}/reset : reset one credential by name or id
//! - PUT    /admin/web-session              : install the web tier session token
//! - DELETE /admin/web-session              : forget the web tier session token

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use common::Secret;
use serde::Deserialize;
use tracing::{info, warn};

use crate::studio::Studio;

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    studio: Arc<Studio>,
}

impl AdminState {
    pub fn new(studio: Arc<Studio>) -> Self {
        Self { studio }
    }
}

/// Build the admin router.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/credentials", get(list_credentials))
        .route("/admin/credentials/reset", post(reset_all))
        .route("/admin/credentials/{name}/reset", post(reset_one))
        .route("/admin/stats", get(stats))
        .route("/admin/web-session", put(set_web_session).delete(clear_web_session))
        .with_state(state)
}

fn json(status: StatusCode, body: serde_json::Value) -> impl IntoResponse {
    (status, [(CONTENT_TYPE, "application/json")], body.to_string())
}

/// GET /admin/credentials
async fn list_credentials(State(state): State<AdminState>) -> impl IntoResponse {
    let credentials = state.studio.list_credential_status().await;
    json(
        StatusCode::OK,
        serde_json::json!({ "credentials": credentials }),
    )
}

/// GET /admin/stats
async fn stats(State(state): State<AdminState>) -> impl IntoResponse {
    let stats = state.studio.stats().await;
    json(StatusCode::OK, serde_json::json!(stats))
}

/// POST /admin/credentials/reset
async fn reset_all(State(state): State<AdminState>) -> impl IntoResponse {
    state.studio.reset_all().await;
    info!("all credentials reset via admin API");
    let stats = state.studio.stats().await;
    json(
        StatusCode::OK,
        serde_json::json!({ "status": "reset", "stats": stats }),
    )
}

/// POST /admin/credentials/{name}/reset
async fn reset_one(State(state): State<AdminState>, Path(name): Path<String>) -> impl IntoResponse {
    match state.studio.reset_one(&name).await {
        Ok(()) => json(
            StatusCode::OK,
            serde_json::json!({ "status": "reset", "credential": name }),
        ),
        Err(key_pool::Error::NotFound(_)) => {
            warn!(credential = %name, "reset requested for unknown credential");
            json(
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": format!("no credential named {name}") }),
            )
        }
        Err(e) => json(
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": e.to_string() }),
        ),
    }
}

#[derive(Deserialize)]
struct WebSessionRequest {
    token: String,
}

/// PUT /admin/web-session
async fn set_web_session(
    State(state): State<AdminState>,
    axum::Json(body): axum::Json<WebSessionRequest>,
) -> impl IntoResponse {
    if body.token.trim().is_empty() {
        return json(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": "token must not be empty" }),
        );
    }
    state
        .studio
        .set_web_session(Secret::new(body.token.trim().to_owned()));
    json(
        StatusCode::OK,
        serde_json::json!({ "web_session": "configured" }),
    )
}

/// DELETE /admin/web-session
async fn clear_web_session(State(state): State<AdminState>) -> impl IntoResponse {
    state.studio.clear_web_session();
    json(
        StatusCode::OK,
        serde_json::json!({ "web_session": "cleared" }),
    )
}
