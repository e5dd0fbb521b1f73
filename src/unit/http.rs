//! Action API for the unit agent
//!
//! Operator actions:
//! - `POST /actions/create-backup`
//! - `GET  /actions/list-backups`
//! - `POST /actions/restore` with `{"backup-id": "..."}`
//! - `GET  /actions/get-primary`
//! - `GET  /actions/get-password`
//! - `GET|PATCH /config/master-start-timeout`
//!
//! Platform hooks (leadership, membership, TLS, S3 integration) live under
//! `/hooks`. Failures answer `{"status": "error", "error": <message>}` where
//! the message is the exact refusal text.

use crate::backup::StaticS3;
use crate::cluster::engine::member_to_unit;
use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{Error, Leadership};
use crate::unit::server::Agent;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AgentState {
    pub agent: Arc<Agent>,
}

/// Error half of every handler
pub struct ActionError(Error);

impl IntoResponse for ActionError {
    fn into_response(self) -> Response {
        let status = self.0.to_http_status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "action failed");
        } else {
            tracing::warn!(error = %self.0, "action refused");
        }
        (
            status,
            Json(json!({ "status": "error", "error": self.0.to_string() })),
        )
            .into_response()
    }
}

impl<E> From<E> for ActionError
where
    E: Into<Error>,
{
    fn from(e: E) -> Self {
        ActionError(e.into())
    }
}

type ActionResult = std::result::Result<Json<Value>, ActionError>;

pub fn create_router(state: AgentState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        // Operator actions
        .route("/actions/create-backup", post(create_backup))
        .route("/actions/list-backups", get(list_backups))
        .route("/actions/restore", post(restore))
        .route("/actions/get-primary", get(get_primary))
        .route("/actions/get-password", get(get_password))
        .route(
            "/config/master-start-timeout",
            get(get_master_start_timeout).patch(set_master_start_timeout),
        )
        // Platform hooks
        .route("/hooks/leader", put(set_leader))
        .route("/hooks/planned-units", put(set_planned_units))
        .route("/hooks/tls", put(set_tls))
        .route("/hooks/members/:member", put(join_member).delete(leave_member))
        .route("/hooks/s3", put(s3_changed).delete(s3_broken))
        .layer(axum::middleware::from_fn(request_tracing_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AgentState>) -> impl IntoResponse {
    let agent = &state.agent;
    let role = agent
        .coordinator
        .topology()
        .await
        .role_of(agent.unit.unit())
        .map(|r| r.to_string());
    Json(json!({
        "status": "healthy",
        "unit": agent.unit.unit(),
        "role": role,
        "is_leader": agent.unit.is_leader(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn status(State(state): State<AgentState>) -> impl IntoResponse {
    Json(state.agent.status().await)
}

async fn create_backup(State(state): State<AgentState>) -> ActionResult {
    let message = state.agent.orchestrator.create_backup().await?;
    Ok(Json(json!({ "status": "ok", "result": message })))
}

async fn list_backups(State(state): State<AgentState>) -> ActionResult {
    let backups = state.agent.orchestrator.list_backups().await?;
    Ok(Json(json!({ "backups": backups })))
}

#[derive(Debug, Default, Deserialize)]
struct RestoreRequest {
    #[serde(rename = "backup-id")]
    backup_id: Option<String>,
}

async fn restore(
    State(state): State<AgentState>,
    body: Option<Json<RestoreRequest>>,
) -> ActionResult {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let message = state
        .agent
        .orchestrator
        .restore(request.backup_id.as_deref())
        .await?;
    Ok(Json(json!({ "status": "ok", "result": message })))
}

async fn get_primary(State(state): State<AgentState>) -> ActionResult {
    let primary = state.agent.get_primary().await?;
    Ok(Json(json!({ "primary": primary })))
}

async fn get_password(State(state): State<AgentState>) -> ActionResult {
    let password = state.agent.get_password()?;
    Ok(Json(json!({ "operator-password": password })))
}

async fn get_master_start_timeout(State(state): State<AgentState>) -> ActionResult {
    let seconds = state.agent.coordinator.master_start_timeout().await?;
    Ok(Json(json!({ "master_start_timeout": seconds })))
}

#[derive(Debug, Deserialize)]
struct MasterStartTimeout {
    master_start_timeout: Option<u64>,
}

async fn set_master_start_timeout(
    State(state): State<AgentState>,
    Json(body): Json<MasterStartTimeout>,
) -> ActionResult {
    state
        .agent
        .coordinator
        .set_master_start_timeout(body.master_start_timeout)
        .await?;
    Ok(Json(
        json!({ "status": "ok", "master_start_timeout": body.master_start_timeout }),
    ))
}

#[derive(Debug, Deserialize)]
struct LeaderHook {
    leader: bool,
}

async fn set_leader(State(state): State<AgentState>, Json(body): Json<LeaderHook>) -> StatusCode {
    state.agent.unit.set_leader(body.leader);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct PlannedUnitsHook {
    planned_units: usize,
}

async fn set_planned_units(
    State(state): State<AgentState>,
    Json(body): Json<PlannedUnitsHook>,
) -> std::result::Result<StatusCode, ActionError> {
    if body.planned_units == 0 {
        return Err(Error::InvalidConfig("planned_units must be at least 1".into()).into());
    }
    state.agent.unit.set_planned_units(body.planned_units);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct TlsHook {
    enabled: bool,
}

async fn set_tls(
    State(state): State<AgentState>,
    Json(body): Json<TlsHook>,
) -> std::result::Result<StatusCode, ActionError> {
    state.agent.set_local_tls(body.enabled).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
struct MemberHook {
    #[serde(default)]
    tls: bool,
}

async fn join_member(
    State(state): State<AgentState>,
    Path(member): Path<String>,
    body: Option<Json<MemberHook>>,
) -> StatusCode {
    let hook = body.map(|Json(h)| h).unwrap_or_default();
    let unit = member_to_unit(&member);
    state.agent.coordinator.join(&unit, hook.tls).await;
    StatusCode::NO_CONTENT
}

async fn leave_member(State(state): State<AgentState>, Path(member): Path<String>) -> StatusCode {
    state
        .agent
        .coordinator
        .leave(&member_to_unit(&member))
        .await;
    StatusCode::NO_CONTENT
}

async fn s3_changed(
    State(state): State<AgentState>,
    Json(data): Json<BTreeMap<String, String>>,
) -> ActionResult {
    let orchestrator = &state.agent.orchestrator;
    orchestrator.s3().attach(Arc::new(StaticS3(data)));
    orchestrator.on_s3_credential_changed().await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn s3_broken(State(state): State<AgentState>) -> ActionResult {
    state.agent.orchestrator.on_s3_relation_broken().await?;
    Ok(Json(json!({ "status": "ok" })))
}
