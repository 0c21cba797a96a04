#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use controller::agent::AgentHandle;
use controller::app_state::AppState;
use controller::dispatcher::{Dispatcher, OrchestrationMode};
use controller::http::build_router;
use controller::persistence::{MemoryStore, Store};
use controller::pki::RootCa;
use controller::registry::AgentRegistry;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    // Keeps the CA directory alive for the test's duration.
    _certs_dir: tempfile::TempDir,
}

/// Build an app over a fresh in-memory store and native-mode dispatcher
/// with short timeouts.
pub fn test_app() -> TestApp {
    let certs_dir = tempfile::tempdir().expect("tempdir");
    let ca = Arc::new(RootCa::init(certs_dir.path()).expect("ca"));
    let store: Store = Arc::new(MemoryStore::new());
    let registry = AgentRegistry::new();
    let dispatcher = Arc::new(
        Dispatcher::new(OrchestrationMode::Native, registry.clone(), None)
            .with_timeouts(Duration::from_millis(100), Duration::from_millis(500)),
    );
    let state = AppState {
        store,
        ca,
        registry,
        dispatcher,
    };
    TestApp {
        router: build_router(state.clone()),
        state,
        _certs_dir: certs_dir,
    }
}

/// Register a fake agent for `node_id` that acknowledges every command
/// it receives. Returns the command log receiver.
pub async fn ack_agent(state: &AppState, node_id: Uuid) -> mpsc::Receiver<proto::AgentCommand> {
    let (tx, mut rx) = mpsc::channel::<proto::AgentCommand>(16);
    let (log_tx, log_rx) = mpsc::channel(16);
    let handle = AgentHandle::new(node_id, tx);
    state.registry.register(handle.clone()).await;

    tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            let command_id = cmd.command_id.clone();
            let _ = log_tx.send(cmd).await;
            handle
                .resolve(&command_id, proto::agent_reply::Reply::Ack(proto::Ack {}))
                .await;
        }
    });
    log_rx
}

pub async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.expect("infallible")
}

pub fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    String::from_utf8_lossy(&bytes).to_string()
}

pub async fn expect_status(response: Response<Body>, status: StatusCode) -> String {
    assert_eq!(response.status(), status, "unexpected status");
    body_text(response).await
}

/// POST a node and return its id.
pub async fn create_node(router: &Router, serial: &str) -> String {
    let body = format!(
        r#"{{"name":"node123","location":"smart edge lab","serial":"{serial}"}}"#
    );
    let response = send(router, json_request("POST", "/nodes", &body)).await;
    let text = expect_status(response, StatusCode::CREATED).await;
    let parsed: serde_json::Value = serde_json::from_str(&text).expect("json");
    parsed["id"].as_str().expect("id").to_string()
}
