//! # HTTP Status API
//!
//! Builds the axum router exposing the daemon's HTTP interface. All
//! endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path       | Description                               |
//! |--------|------------|-------------------------------------------|
//! | GET    | `/healthz` | Liveness probe                            |
//! | GET    | `/status`  | Node status summary                       |
//! | GET    | `/view`    | Current group view (canonical JSON form)  |
//! | GET    | `/config`  | Effective provider configuration          |
//!
//! The view served here is the same canonical JSON a client receives from
//! the `get_view` RPC, so the HTTP API doubles as a bootstrap source:
//! `curl node:7001/view > group.json` is a valid seed file.

use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use roster_protocol::Provider;

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone — everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// Address the RPC transport listens on (what peers dial).
    pub transport_address: String,
    /// The running membership provider.
    pub provider: Arc<Provider>,
    /// Startup timestamp, for uptime reporting.
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// Prometheus metrics, for in-handler recording.
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(health_handler))
        .route("/status", get(status_handler))
        .route("/view", get(view_handler))
        .route("/config", get(config_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Response body for `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub backend: String,
    pub transport_address: String,
    pub provider_id: u16,
    pub group_size: usize,
    /// Hex-encoded view digest — the client cache-freshness token.
    pub digest: String,
    pub uptime_seconds: i64,
    pub timestamp: String,
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let view = state.provider.view_snapshot();
    // The observer keeps the gauge incrementally; a status poll is a
    // cheap opportunity to correct any drift against the actual view.
    state.metrics.group_size.set(view.members.len() as i64);
    let now = chrono::Utc::now();
    Json(StatusResponse {
        version: state.version.clone(),
        backend: state.provider.backend().kind().to_string(),
        transport_address: state.transport_address.clone(),
        provider_id: state.provider.provider_id(),
        group_size: view.members.len(),
        digest: format!("{:016x}", view.content_digest()),
        uptime_seconds: (now - state.started_at).num_seconds(),
        timestamp: now.to_rfc3339(),
    })
}

async fn view_handler(State(state): State<AppState>) -> impl IntoResponse {
    // Canonical serialized form, byte-identical to what write_to_file
    // produces.
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        state.provider.view_snapshot().to_json(),
    )
}

async fn config_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.provider.config_json())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use roster_protocol::{MemoryNetwork, ProviderArgs};
    use tower::ServiceExt;

    async fn test_state() -> AppState {
        let network = MemoryNetwork::new();
        let transport = network.endpoint("mem://api-test");
        let provider = Provider::start(ProviderArgs {
            transport,
            provider_id: 3,
            config: serde_json::json!({
                "group": {"type": "static"},
                "bootstrap": "self",
            }),
            backend: None,
            observers: None,
            initial_view: None,
        })
        .await
        .unwrap();

        AppState {
            version: "test".into(),
            transport_address: "mem://api-test".into(),
            provider,
            started_at: chrono::Utc::now(),
            metrics: Arc::new(crate::metrics::NodeMetrics::new()),
        }
    }

    async fn get(router: Router, path: &str) -> (StatusCode, Vec<u8>) {
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri(path)
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn health_endpoint_is_alive() {
        let router = create_router(test_state().await);
        let (status, body) = get(router, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn status_reports_backend_and_group_size() {
        let router = create_router(test_state().await);
        let (status, body) = get(router, "/status").await;
        assert_eq!(status, StatusCode::OK);

        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["backend"], "static");
        assert_eq!(parsed["group_size"], 1);
        assert_eq!(parsed["provider_id"], 3);
        assert_eq!(parsed["digest"].as_str().unwrap().len(), 16);
    }

    #[tokio::test]
    async fn view_endpoint_serves_canonical_json() {
        let state = test_state().await;
        let expected = state.provider.view_snapshot().to_json();
        let router = create_router(state);

        let (status, body) = get(router, "/view").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, expected.as_bytes());

        // A valid seed file: it must parse back.
        roster_protocol::WireView::from_json(std::str::from_utf8(&body).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn config_endpoint_names_the_backend() {
        let router = create_router(test_state().await);
        let (status, body) = get(router, "/config").await;
        assert_eq!(status, StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["group"]["type"], "static");
    }
}
