//! `GET/POST/PATCH/DELETE /api/backlog` (SPEC_FULL.md §3, §4.7).

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use session_manager_core::persistence::models::BacklogItem;

use crate::http::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateBacklogItemRequest {
    #[serde(rename = "type")]
    pub item_type: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: String,
}

fn default_priority() -> String {
    "medium".to_string()
}

#[derive(Debug, Deserialize)]
pub struct UpdateBacklogItemRequest {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_backlog).post(create_backlog_item))
        .route("/:id", axum::routing::patch(update_backlog_item).delete(delete_backlog_item))
}

async fn list_backlog(State(state): State<AppState>) -> Json<Vec<BacklogItem>> {
    Json(state.persistence.list_backlog())
}

async fn create_backlog_item(
    State(state): State<AppState>,
    Json(req): Json<CreateBacklogItemRequest>,
) -> Result<Json<BacklogItem>, ApiError> {
    let now = now_iso();
    let item = BacklogItem {
        id: uuid::Uuid::new_v4().to_string(),
        item_type: req.item_type,
        title: req.title,
        description: req.description,
        priority: req.priority,
        status: "open".to_string(),
        created_at: now.clone(),
        updated_at: now,
    };
    Ok(Json(state.persistence.create_backlog_item(item)?))
}

async fn update_backlog_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateBacklogItemRequest>,
) -> Result<Json<BacklogItem>, ApiError> {
    let item = state.persistence.update_backlog_item(&id, req.status, req.priority, now_iso())?;
    Ok(Json(item))
}

async fn delete_backlog_item(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    state.persistence.delete_backlog_item(&id)?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}
