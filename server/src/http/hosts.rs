//! `GET/POST/PUT/DELETE /api/hosts`, `POST /api/hosts/test` (SPEC_FULL.md §4.7).

use axum::extract::{Path, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use session_manager_core::config::{validate_host_config, HostConfig, JumpHostConfig};

use crate::http::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostResponse {
    pub id: String,
    pub name: String,
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub has_password: bool,
    pub has_key: bool,
    pub use_agent: bool,
    pub has_jump_host: bool,
    pub is_local: bool,
}

impl From<&HostConfig> for HostResponse {
    fn from(h: &HostConfig) -> Self {
        Self {
            id: h.id.clone(),
            name: h.name.clone(),
            hostname: h.hostname.clone(),
            port: h.port,
            username: h.username.clone(),
            has_password: h.password.is_some() || h.password_env_var.is_some(),
            has_key: h.private_key_path.is_some(),
            use_agent: h.use_agent,
            has_jump_host: h.jump_host.is_some(),
            is_local: h.is_local(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRequest {
    pub id: String,
    pub name: String,
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub private_key_path: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_env_var: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default)]
    pub passphrase_env_var: Option<String>,
    #[serde(default)]
    pub use_agent: bool,
    #[serde(default)]
    pub jump_host: Option<JumpHostConfig>,
}

fn default_port() -> u16 {
    22
}

impl HostRequest {
    fn into_host_config(self) -> HostConfig {
        HostConfig {
            id: self.id,
            name: self.name,
            hostname: self.hostname,
            port: self.port,
            username: self.username,
            private_key_path: self.private_key_path,
            password: self.password,
            password_env_var: self.password_env_var,
            passphrase: self.passphrase,
            passphrase_env_var: self.passphrase_env_var,
            use_agent: self.use_agent,
            jump_host: self.jump_host.map(Box::new),
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_hosts).post(create_host))
        .route("/test", post(test_host))
        .route("/:id", put(update_host).delete(delete_host))
}

async fn list_hosts(State(state): State<AppState>) -> Json<Vec<HostResponse>> {
    let hosts = state.hosts_snapshot();
    Json(hosts.iter().map(HostResponse::from).collect())
}

async fn create_host(State(state): State<AppState>, Json(req): Json<HostRequest>) -> Result<Json<HostResponse>, ApiError> {
    let existing_ids = state.host_ids();
    let existing: Vec<&str> = existing_ids.iter().map(String::as_str).collect();
    let host = req.into_host_config();
    validate_host_config(&host, &existing)?;
    let response = HostResponse::from(&host);
    state.insert_host(host.expand());
    persist(&state);
    Ok(Json(response))
}

async fn update_host(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<HostRequest>,
) -> Result<Json<HostResponse>, ApiError> {
    if state.host(&id).is_none() {
        return Err(ApiError::not_found(format!("host '{id}' not found")));
    }
    let mut host = req.into_host_config();
    host.id = id; // id is immutable; the path segment wins over the body.
    let existing_ids = state.host_ids();
    let existing: Vec<&str> = existing_ids.iter().map(String::as_str).filter(|existing_id| *existing_id != host.id).collect();
    validate_host_config(&host, &existing)?;
    let response = HostResponse::from(&host);
    state.insert_host(host.expand());
    persist(&state);
    // Config changes invalidate the live connection; the next use
    // reconnects with the new settings (SPEC_FULL.md §4.7).
    state.connections.disconnect(&host.id);
    Ok(Json(response))
}

async fn delete_host(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    if id == HostConfig::LOCAL_ID {
        return Err(ApiError::bad_request("the local host cannot be removed"));
    }
    if state.host(&id).is_none() {
        return Err(ApiError::not_found(format!("host '{id}' not found")));
    }
    state.remove_host(&id);
    persist(&state);
    Ok(Json(serde_json::json!({ "deleted": id })))
}

async fn test_host(State(state): State<AppState>, Json(req): Json<HostRequest>) -> Result<Json<serde_json::Value>, ApiError> {
    let host = req.into_host_config().expand();
    state.connections.test_direct(&host)?;
    Ok(Json(serde_json::json!({ "reachable": true })))
}

fn persist(state: &AppState) {
    let hosts = state.hosts_snapshot();
    if let Err(e) = crate::config::save_hosts(&crate::config::data_dir(), &hosts) {
        tracing::warn!(error = %e, "failed to persist hosts.json");
    }
}
