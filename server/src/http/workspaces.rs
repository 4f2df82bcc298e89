//! `GET/POST/PUT/DELETE /api/workspaces` (SPEC_FULL.md §4.3, §4.7).

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use session_manager_core::persistence::models::Workspace;

use crate::http::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateWorkspaceRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWorkspaceRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<Option<String>>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_workspaces).post(create_workspace))
        .route("/:id", axum::routing::put(update_workspace).delete(delete_workspace))
}

async fn list_workspaces(State(state): State<AppState>) -> Json<Vec<Workspace>> {
    Json(state.persistence.list_workspaces())
}

async fn create_workspace(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkspaceRequest>,
) -> Result<Json<Workspace>, ApiError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = now_iso();
    let workspace = state.persistence.create_workspace(id, req.name, req.description, now)?;
    Ok(Json(workspace))
}

async fn update_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateWorkspaceRequest>,
) -> Result<Json<Workspace>, ApiError> {
    let now = now_iso();
    let workspace = state.persistence.rename_workspace(&id, req.name, req.description, now)?;
    Ok(Json(workspace))
}

async fn delete_workspace(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    state.persistence.delete_workspace(&id)?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}
