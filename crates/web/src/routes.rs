//! Status API routes
//!
//! Stateless read handlers over the mesh provider. Every request re-queries
//! the daemon; nothing is cached here.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use meshwatch_common::{MeshProvider, PeerInfo, SelfStatus};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Shared handler state
#[derive(Clone)]
pub struct StatusApiState {
    provider: Arc<dyn MeshProvider>,
}

impl StatusApiState {
    pub fn new(provider: Arc<dyn MeshProvider>) -> Self {
        Self { provider }
    }
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    version: String,
}

/// Build the status API router
pub fn status_router(provider: Arc<dyn MeshProvider>) -> Router {
    Router::new()
        .route("/peers", get(list_peers_handler))
        // Unlisted methods fall through to 405. HEAD is routed explicitly,
        // otherwise `get` would answer it.
        .route(
            "/peer",
            get(list_peers_handler)
                .head(peer_head_handler)
                .post(peer_mutation_handler)
                .delete(peer_mutation_handler),
        )
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(StatusApiState::new(provider))
}

fn mesh_error(e: meshwatch_common::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Failed to get mesh status: {}", e),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_peers_handler(State(state): State<StatusApiState>) -> Response {
    match state.provider.status().await {
        Ok(status) => {
            let peers: Vec<PeerInfo> = status.peers.iter().map(PeerInfo::from).collect();
            Json(peers).into_response()
        }
        Err(e) => mesh_error(e),
    }
}

async fn peer_mutation_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_IMPLEMENTED,
        "Peers are managed by the control plane",
    )
}

async fn peer_head_handler() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "GET,POST,DELETE")],
    )
}

async fn status_handler(State(state): State<StatusApiState>) -> Response {
    match state.provider.status().await {
        Ok(status) => Json(SelfStatus::from(&status)).into_response(),
        Err(e) => mesh_error(e),
    }
}

async fn health_handler(State(state): State<StatusApiState>) -> impl IntoResponse {
    match state.provider.status().await {
        Ok(status) if status.logged_in => (StatusCode::OK, "OK"),
        Ok(_) => (StatusCode::SERVICE_UNAVAILABLE, "Not logged in"),
        Err(e) => {
            debug!("health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "Unhealthy")
        }
    }
}

async fn version_handler(State(state): State<StatusApiState>) -> Response {
    match state.provider.version().await {
        Ok(version) => Json(VersionResponse { version }).into_response(),
        Err(e) => mesh_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use meshwatch_common::{MemoryMeshProvider, NodeInfo, PeerSnapshot};
    use tower::ServiceExt;

    fn node() -> NodeInfo {
        NodeInfo {
            hostname: "gateway".to_string(),
            mesh_address: "100.64.0.1".to_string(),
            public_key: "nodekey:self".to_string(),
            online: true,
        }
    }

    fn peer(key: &str) -> PeerSnapshot {
        PeerSnapshot {
            public_key: key.to_string(),
            hostname: format!("host-{}", key),
            mesh_address: "100.64.0.2".to_string(),
            allowed_ips: vec!["100.64.0.2/32".to_string()],
            online: true,
            rx_bytes: 100,
            tx_bytes: 200,
        }
    }

    async fn call(
        provider: &MemoryMeshProvider,
        method: Method,
        uri: &str,
    ) -> (StatusCode, Vec<u8>) {
        let app = status_router(Arc::new(provider.clone()));
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_list_peers() {
        let provider = MemoryMeshProvider::logged_in(node());
        provider.set_peers(vec![peer("a"), peer("b")]);

        let (status, body) = call(&provider, Method::GET, "/peers").await;
        assert_eq!(status, StatusCode::OK);

        let peers: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(peers.as_array().unwrap().len(), 2);
        assert_eq!(peers[0]["publicKey"], "a");
        assert_eq!(peers[0]["connected"], true);
        assert_eq!(peers[1]["hostname"], "host-b");
    }

    #[tokio::test]
    async fn test_list_peers_provider_failure() {
        let provider = MemoryMeshProvider::new();
        provider.fail_queries(Some("daemon gone"));

        let (status, body) = call(&provider, Method::GET, "/peers").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(String::from_utf8(body).unwrap().contains("daemon gone"));
    }

    #[tokio::test]
    async fn test_peer_get_matches_peers() {
        let provider = MemoryMeshProvider::logged_in(node());
        provider.set_peers(vec![peer("a")]);

        let (_, peers_body) = call(&provider, Method::GET, "/peers").await;
        let (status, peer_body) = call(&provider, Method::GET, "/peer").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(peers_body, peer_body);
    }

    #[tokio::test]
    async fn test_peer_mutations_not_implemented() {
        let provider = MemoryMeshProvider::logged_in(node());

        let (status, _) = call(&provider, Method::POST, "/peer").await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);

        let (status, _) = call(&provider, Method::DELETE, "/peer").await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn test_peer_other_method_not_allowed() {
        let provider = MemoryMeshProvider::logged_in(node());

        let (status, _) = call(&provider, Method::PUT, "/peer").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, _) = call(&provider, Method::PATCH, "/peer").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, body) = call(&provider, Method::HEAD, "/peer").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_status_view() {
        let provider = MemoryMeshProvider::logged_in(node());
        provider.set_peers(vec![peer("a"), peer("b"), peer("c")]);

        let (status, body) = call(&provider, Method::GET, "/status").await;
        assert_eq!(status, StatusCode::OK);

        let view: SelfStatus = serde_json::from_slice(&body).unwrap();
        assert!(view.logged_in);
        assert_eq!(view.hostname, "gateway");
        assert_eq!(view.mesh_address, "100.64.0.1");
        assert_eq!(view.public_key, "nodekey:self");
        assert!(view.online);
        assert_eq!(view.peer_count, 3);
    }

    #[tokio::test]
    async fn test_status_provider_failure() {
        let provider = MemoryMeshProvider::new();
        provider.fail_queries(Some("timeout"));

        let (status, _) = call(&provider, Method::GET, "/status").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_health_logged_in_regardless_of_peers() {
        let provider = MemoryMeshProvider::logged_in(node());

        let (status, body) = call(&provider, Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");

        provider.set_peers(vec![peer("a"), peer("b")]);
        let (status, body) = call(&provider, Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
    }

    #[tokio::test]
    async fn test_health_not_logged_in() {
        let provider = MemoryMeshProvider::new();

        let (status, body) = call(&provider, Method::GET, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, b"Not logged in");
    }

    #[tokio::test]
    async fn test_health_provider_unreachable() {
        let provider = MemoryMeshProvider::logged_in(node());
        provider.fail_queries(Some("connection refused"));

        let (status, body) = call(&provider, Method::GET, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, b"Unhealthy");
    }

    #[tokio::test]
    async fn test_version() {
        let provider = MemoryMeshProvider::new();

        let (status, body) = call(&provider, Method::GET, "/version").await;
        assert_eq!(status, StatusCode::OK);
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(value["version"].as_str().unwrap().starts_with("memory-"));
    }
}
