//! Action API served by the unit agent, driven through the router

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use common::{agent_config, s3_data, FakeEngine, FakeTool, FakeWorkload, InfoAnswer};
use pgwarden::backup::{Collaborators, S3Settings};
use pgwarden::common::PeerData;
use pgwarden::unit::{create_router, AgentState};
use pgwarden::Agent;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

struct Harness {
    _dir: TempDir,
    agent: Arc<Agent>,
    engine: Arc<FakeEngine>,
    tool: Arc<FakeTool>,
    router: Router,
}

impl Harness {
    async fn new(planned_units: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let config = agent_config("pg/0", planned_units, dir.path());
        let engine = Arc::new(FakeEngine::new());
        let tool = Arc::new(FakeTool::new(InfoAnswer::Listing(Vec::new())));
        let collaborators = Collaborators {
            engine: engine.clone(),
            tool: tool.clone(),
            workload: Arc::new(FakeWorkload::default()),
            s3: Arc::new(S3Settings::new()),
        };
        let agent = Arc::new(Agent::assemble(
            &config,
            Arc::new(PeerData::in_memory()),
            collaborators,
        ));
        agent.join_cluster(&["pg/1".to_string(), "pg/2".to_string()]).await;
        let router = create_router(AgentState {
            agent: agent.clone(),
        });
        Self {
            _dir: dir,
            agent,
            engine,
            tool,
            router,
        }
    }

    async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new(3).await;
    let (status, body) = h.call(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["unit"], "pg/0");
}

#[tokio::test]
async fn test_password_generated_once_by_leader() {
    let h = Harness::new(3).await;

    // Non-leaders cannot create it.
    let (status, _) = h.call(Method::GET, "/actions/get-password", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = h
        .call(Method::PUT, "/hooks/leader", Some(json!({ "leader": true })))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, first) = h.call(Method::GET, "/actions/get-password", None).await;
    let (_, second) = h.call(Method::GET, "/actions/get-password", None).await;
    let password = first["operator-password"].as_str().unwrap();
    assert_eq!(password.len(), 16);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_restore_without_backup_id_is_refused() {
    let h = Harness::new(1).await;
    let (status, body) = h.call(Method::POST, "/actions/restore", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing backup-id to restore");
}

#[tokio::test]
async fn test_create_backup_refusal_is_verbatim() {
    let h = Harness::new(3).await;
    let (status, body) = h
        .call(Method::POST, "/actions/create-backup", Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "Unit cannot perform backups as TLS is not enabled"
    );
    assert!(h.tool.calls().is_empty());
}

#[tokio::test]
async fn test_get_primary_refreshes_from_engine() {
    let h = Harness::new(3).await;
    h.engine.elect(&["pg/0", "pg/1", "pg/2"], "pg/1");

    let (status, body) = h.call(Method::GET, "/actions/get-primary", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["primary"], "pg/1");
}

#[tokio::test]
async fn test_master_start_timeout_round_trip() {
    let h = Harness::new(3).await;

    let (status, _) = h
        .call(
            Method::PATCH,
            "/config/master-start-timeout",
            Some(json!({ "master_start_timeout": 0 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(*h.engine.master_start_timeout.lock().unwrap(), Some(0));

    let (_, body) = h
        .call(Method::GET, "/config/master-start-timeout", None)
        .await;
    assert_eq!(body["master_start_timeout"], 0);

    h.call(
        Method::PATCH,
        "/config/master-start-timeout",
        Some(json!({ "master_start_timeout": null })),
    )
    .await;
    let (_, body) = h
        .call(Method::GET, "/config/master-start-timeout", None)
        .await;
    assert_eq!(body["master_start_timeout"], Value::Null);
}

#[tokio::test]
async fn test_s3_hook_claims_stanza() {
    let h = Harness::new(1).await;
    h.call(Method::PUT, "/hooks/leader", Some(json!({ "leader": true })))
        .await;

    let (status, _) = h
        .call(Method::PUT, "/hooks/s3", Some(serde_json::to_value(s3_data()).unwrap()))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = h.call(Method::GET, "/status", None).await;
    assert_eq!(body["stanza"], "prod.patroni-pg");
    assert_ne!(body["status"]["status"], "blocked");
}

#[tokio::test]
async fn test_s3_hook_with_missing_parameters_blocks() {
    let h = Harness::new(1).await;

    let (status, body) = h
        .call(Method::PUT, "/hooks/s3", Some(json!({ "bucket": "backups" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing S3 parameters: ['access-key', 'secret-key']");

    let status = h.agent.status().await;
    assert_eq!(
        status.status.message(),
        "Missing S3 parameters: ['access-key', 'secret-key']"
    );
}

#[tokio::test]
async fn test_member_hooks_update_topology() {
    let h = Harness::new(3).await;

    let (status, _) = h
        .call(Method::PUT, "/hooks/members/pg-3", Some(json!({ "tls": true })))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let topology = h.agent.coordinator.topology().await;
    assert!(topology.member("pg/3").unwrap().tls_enabled);

    h.call(Method::DELETE, "/hooks/members/pg-3", None).await;
    assert!(h.agent.coordinator.topology().await.member("pg/3").is_none());
}
