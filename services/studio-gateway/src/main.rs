//! Studio generation gateway
//!
//! Single-binary Rust service that:
//! 1. Loads a pool of generative-API keys and their persisted health
//! 2. Serves image and text generation over HTTP
//! 3. Rotates keys on quota failures, throttling every upstream call
//! 4. Falls back to the web session tier, then the keyless tier

mod admin;
mod api;
mod config;
mod error;
mod fallback;
mod metrics;
mod pool_backend;
mod studio;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use backend::{Backend, GeminiClient, OpenBackend, SessionBackend};
use key_pool::{Dispatcher, JsonFilePersistence, KeyPool, MemoryPersistence, Persistence, StatusStore};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::{AdminState, build_admin_router};
use crate::api::ApiState;
use crate::config::Config;
use crate::fallback::FallbackChain;
use crate::pool_backend::PoolBackend;
use crate::studio::Studio;

/// Time allowed for in-flight generations to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the public router.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: ApiState, max_connections: usize) -> Router {
    Router::new()
        .route("/v1/images", post(api::generate_image))
        .route("/v1/text", post(api::generate_text))
        .route("/health", get(api::health))
        .route("/metrics", get(api::metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Wire the pool, backends and fallback chain from config.
async fn build_studio(config: &Config) -> Result<Studio> {
    let http = reqwest::Client::new();
    let timeout = Duration::from_secs(config.server.timeout_secs);

    let persistence: Arc<dyn Persistence> = match &config.pool.state_path {
        Some(path) => {
            info!(path = %path.display(), "credential status persisted to file");
            Arc::new(JsonFilePersistence::new(path.clone()))
        }
        None => {
            warn!("no pool.state_path configured, credential status kept in memory only");
            Arc::new(MemoryPersistence::new())
        }
    };
    let store = Arc::new(StatusStore::load(persistence).await);
    let policy = config.pool.rotation_policy()?;
    let pool = Arc::new(KeyPool::new(
        config.pool_credentials(),
        store,
        Arc::new(Dispatcher::new(config.pool.min_interval())),
        policy,
    ));

    let gemini = GeminiClient::new(
        http.clone(),
        &config.gemini.base_url,
        &config.gemini.image_model,
        &config.gemini.text_model,
        timeout,
    );
    let web = Arc::new(SessionBackend::new(http.clone(), &config.web.base_url, timeout));
    if let Some(session) = &config.web.session {
        web.set_session(session.clone());
    }
    let open = OpenBackend::new(http, &config.open.image_url, &config.open.text_url, timeout);

    let tiers: Vec<Arc<dyn Backend>> = vec![
        Arc::new(PoolBackend::new(pool.clone(), gemini)),
        web.clone(),
        Arc::new(open),
    ];
    Ok(Studio::new(FallbackChain::new(tiers), pool, web))
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filter from LOG_LEVEL then RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting studio-gateway");

    // Install before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        admin_addr = ?config.server.admin_addr,
        credentials = config.credentials.len(),
        web_session = config.web.session.is_some(),
        "configuration loaded"
    );

    let studio = Arc::new(build_studio(&config).await?);

    let app = build_router(
        ApiState {
            studio: studio.clone(),
            prometheus: prometheus_handle,
            started_at: Instant::now(),
        },
        config.server.max_connections,
    );

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;

    let admin_listener = match config.server.admin_addr {
        Some(addr) => Some((
            TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind admin listener to {addr}"))?,
            addr,
        )),
        None => None,
    };

    info!(addr = %config.server.listen_addr, "accepting requests");

    // The drain timer starts at signal receipt: both servers are told to
    // drain, then the public server gets DRAIN_TIMEOUT to finish.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let admin_handle = admin_listener.map(|(admin_listener, addr)| {
        info!(addr = %addr, "admin API listening");
        let admin_app = build_admin_router(AdminState::new(studio.clone()));
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            axum::serve(admin_listener, admin_app)
                .with_graceful_shutdown(async move {
                    let _ = rx.wait_for(|stop| *stop).await;
                })
                .await
        })
    });

    let mut rx = shutdown_rx;
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.wait_for(|stop| *stop).await;
            })
            .await
    });

    shutdown_signal().await;

    let _ = shutdown_tx.send(true);
    studio.cancel_pending();

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }
    if let Some(handle) = admin_handle {
        handle.abort();
    }

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use metrics_exporter_prometheus::PrometheusHandle;
    use tower::ServiceExt;

    use crate::fallback::tests::{FakeBackend, chain_of, exhausted, image_ok, unavailable};
    use crate::studio::tests::{test_pool, test_web};

    /// PrometheusHandle without installing a global recorder.
    fn test_prometheus_handle() -> PrometheusHandle {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle()
    }

    async fn test_app(tiers: Vec<Arc<FakeBackend>>) -> Router {
        let studio = Studio::new(chain_of(tiers), test_pool(&["a", "b"]).await, test_web());
        build_router(
            ApiState {
                studio: Arc::new(studio),
                prometheus: test_prometheus_handle(),
                started_at: Instant::now(),
            },
            16,
        )
    }

    fn text_ok() -> backend::Result<backend::Asset> {
        Ok(backend::Asset::Text("a caption".into()))
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), 10 * 1024 * 1024)
            .await
            .unwrap()
            .to_vec()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn image_returns_bytes_with_content_type() {
        let app = test_app(vec![FakeBackend::new("open", true, image_ok)]).await;
        let response = app
            .oneshot(post_json(
                "/v1/images",
                serde_json::json!({"prompt": "a lighthouse", "aspect_ratio": "16:9", "seed": 7}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "image/png");
        assert!(
            response.headers()["x-request-id"]
                .to_str()
                .unwrap()
                .starts_with("req_")
        );
        assert_eq!(body_bytes(response).await, vec![0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn image_falls_back_past_exhausted_pool() {
        let primary = FakeBackend::new("primary", true, exhausted);
        let open = FakeBackend::new("open", true, image_ok);
        let app = test_app(vec![primary.clone(), open.clone()]).await;

        let response = app
            .oneshot(post_json("/v1/images", serde_json::json!({"prompt": "a fox"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(primary.calls(), 1);
        assert_eq!(open.calls(), 1);
    }

    #[tokio::test]
    async fn total_failure_is_502_with_aggregated_message() {
        let app = test_app(vec![
            FakeBackend::new("primary", true, exhausted),
            FakeBackend::new("web", false, image_ok),
            FakeBackend::new("open", true, unavailable),
        ])
        .await;

        let response = app
            .oneshot(post_json("/v1/images", serde_json::json!({"prompt": "a fox"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["error"]["type"], "all_backends_failed");
        let message = json["error"]["message"].as_str().unwrap();
        assert!(message.contains("primary: credentials exhausted"), "got: {message}");
        assert!(message.contains("web: not configured"), "got: {message}");
        assert!(message.contains("open: upstream returned HTTP 503"), "got: {message}");
        assert!(json["error"]["request_id"].as_str().unwrap().starts_with("req_"));
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let app = test_app(vec![FakeBackend::new("open", true, image_ok)]).await;
        let response = app
            .oneshot(post_json("/v1/images", serde_json::json!({"aspect_ratio": "1:1"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["error"]["type"], "invalid_request");
    }

    #[tokio::test]
    async fn unsupported_aspect_ratio_is_400() {
        let app = test_app(vec![FakeBackend::new("open", true, image_ok)]).await;
        let response = app
            .oneshot(post_json(
                "/v1/images",
                serde_json::json!({"prompt": "x", "aspect_ratio": "2:1"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn blank_prompt_is_400() {
        let app = test_app(vec![FakeBackend::new("open", true, text_ok)]).await;
        let response = app
            .oneshot(post_json("/v1/text", serde_json::json!({"prompt": "  "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn text_returns_json_envelope() {
        let app = test_app(vec![FakeBackend::new("open", true, text_ok)]).await;
        let response = app
            .oneshot(post_json("/v1/text", serde_json::json!({"prompt": "caption"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["format"], "text");
        assert_eq!(json["text"], "a caption");
    }

    #[tokio::test]
    async fn health_reports_pool_and_tiers() {
        let app = test_app(vec![
            FakeBackend::new("primary", true, image_ok),
            FakeBackend::new("open", true, image_ok),
        ])
        .await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["pool"]["credentials_total"], 2);
        assert_eq!(json["web_session"], false);
        assert_eq!(json["tiers"], serde_json::json!(["primary", "open"]));
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text_format() {
        let app = test_app(vec![]).await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
    }
}
