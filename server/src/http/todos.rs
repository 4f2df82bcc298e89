//! `GET/POST/PATCH/DELETE /api/todos` (SPEC_FULL.md §3, §4.7).

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use session_manager_core::persistence::models::Todo;

use crate::http::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTodoRequest {
    pub text: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTodoRequest {
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub text: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_todos).post(create_todo))
        .route("/:id", axum::routing::patch(update_todo).delete(delete_todo))
}

async fn list_todos(State(state): State<AppState>) -> Json<Vec<Todo>> {
    Json(state.persistence.list_todos())
}

async fn create_todo(State(state): State<AppState>, Json(req): Json<CreateTodoRequest>) -> Result<Json<Todo>, ApiError> {
    let now = now_iso();
    let todo = Todo {
        id: uuid::Uuid::new_v4().to_string(),
        workspace_id: req.workspace_id,
        text: req.text,
        completed: false,
        created_at: now.clone(),
        updated_at: now,
    };
    Ok(Json(state.persistence.create_todo(todo)?))
}

async fn update_todo(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTodoRequest>,
) -> Result<Json<Todo>, ApiError> {
    let todo = state.persistence.update_todo(&id, req.completed, req.text, now_iso())?;
    Ok(Json(todo))
}

async fn delete_todo(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    state.persistence.delete_todo(&id)?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}
