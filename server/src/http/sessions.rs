//! `POST /api/sessions`, `/attach`, `GET /available`, `DELETE /:id`,
//! `POST /:id/hide` (SPEC_FULL.md §4.4, §4.7).

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use session_manager_core::discovery::AvailableSession;
use session_manager_core::mux;
use session_manager_core::session::Session;

use crate::http::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub host_id: String,
    pub name: String,
    pub working_dir: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub workspace_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachRequest {
    pub session_id: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AvailableQuery {
    #[serde(rename = "hostId")]
    pub host_id: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_session))
        .route("/attach", post(attach_session))
        .route("/available", get(list_available))
        .route("/:id", axum::routing::delete(delete_session))
        .route("/:id/hide", post(hide_session))
}

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<Session>, ApiError> {
    let host = state
        .host(&req.host_id)
        .ok_or_else(|| ApiError::not_found(format!("host '{}' not found", req.host_id)))?;

    if req.working_dir != "~" {
        let check = format!("test -d '{}'", req.working_dir);
        let (exit, _, _) = state
            .discovery
            .run_command(&host, &check)
            .map_err(|e| ApiError::bad_request(format!("could not verify working directory: {e}")))?;
        if exit != 0 {
            return Err(ApiError::bad_request(format!(
                "working directory '{}' does not exist on host '{}'",
                req.working_dir, req.host_id
            )));
        }
    }

    let create_cmd = mux::build_create_session_command(&req.name, &req.working_dir, req.command.as_deref());
    let (exit, _, stderr) = state
        .discovery
        .run_command(&host, &create_cmd)
        .map_err(ApiError::bad_request)?;
    if exit != 0 {
        return Err(ApiError::bad_request(format!("failed to create session: {stderr}")));
    }

    let wait = if host.is_local() { Duration::from_millis(500) } else { Duration::from_millis(1500) };
    tokio::time::sleep(wait).await;

    let snapshot = state.discovery.run_cycle().await;
    let created = snapshot
        .iter()
        .find(|s| s.host.id == req.host_id && s.name == req.name)
        .cloned()
        .ok_or_else(|| ApiError::not_found("session was created but not found by discovery"))?;

    state.discovery.add_managed(&created.id.0, req.workspace_id.clone())?;
    Ok(Json(created))
}

async fn attach_session(State(state): State<AppState>, Json(req): Json<AttachRequest>) -> Result<Json<Session>, ApiError> {
    let snapshot = state.discovery.subscribe().borrow().clone();
    let session = snapshot
        .iter()
        .find(|s| s.id.0 == req.session_id)
        .cloned()
        .ok_or_else(|| ApiError::not_found(format!("session '{}' not found", req.session_id)))?;

    state.discovery.add_managed(&session.id.0, req.workspace_id.clone())?;
    state.discovery.unhide(&session.id.0)?;
    Ok(Json(session))
}

async fn list_available(State(state): State<AppState>, Query(query): Query<AvailableQuery>) -> Json<Vec<AvailableSession>> {
    Json(state.discovery.list_available_for(&query.host_id))
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = state.discovery.subscribe().borrow().clone();
    if let Some(session) = snapshot.iter().find(|s| s.id.0 == id) {
        if let Some(host) = state.host(&session.host.id) {
            let cmd = mux::build_kill_session_command(&session.mux.session_name);
            let _ = state.discovery.run_command(&host, &cmd);
        }
    }
    state.bridges.close(&id);
    state.discovery.remove_managed(&id)?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

async fn hide_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    state.discovery.hide(&id)?;
    Ok(Json(serde_json::json!({ "hidden": id })))
}
