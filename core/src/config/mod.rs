//! Configuration value types consumed by the engine.
//!
//! Config *file loading* mechanics are a collaborator's concern (see
//! SPEC_FULL.md §1 Non-goals); this module only defines the validated
//! shapes the engine accepts and the validation rules a loader must run
//! before constructing a `Server`.

pub mod expand;

use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

/// One configured remote (or the local pseudo-host) as loaded from
/// `hosts.json`. Exactly one auth method is *effective* at runtime (see
/// `connection::auth::assemble`), computed from whichever of
/// `password`/`password_env_var`/`private_key_path`/`use_agent` resolve.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    pub id: String,
    pub name: String,
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env_var: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase_env_var: Option<String>,
    #[serde(default)]
    pub use_agent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jump_host: Option<Box<JumpHostConfig>>,
}

/// A jump/bastion host — the same shape as [`HostConfig`] minus the
/// ability to nest a further jump host (single-hop bastion only).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JumpHostConfig {
    pub id: String,
    pub name: String,
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env_var: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase_env_var: Option<String>,
    #[serde(default)]
    pub use_agent: bool,
}

impl HostConfig {
    /// The synthetic id for the local (non-SSH) host, always present.
    pub const LOCAL_ID: &'static str = "local";

    pub fn is_local(&self) -> bool {
        self.id == Self::LOCAL_ID
    }

    /// Expand `~` and `${env:...}` placeholders in path/secret fields.
    pub fn expand(mut self) -> Self {
        self.hostname = expand::expand_env_placeholders(&self.hostname);
        self.username = expand::expand_env_placeholders(&self.username);
        self.private_key_path = self
            .private_key_path
            .map(|s| expand::expand_tilde(&expand::expand_env_placeholders(&s)));
        self.password = self.password.map(|s| expand::expand_env_placeholders(&s));
        self.jump_host = self.jump_host.map(|j| Box::new(j.expand()));
        self
    }
}

impl JumpHostConfig {
    pub fn expand(mut self) -> Self {
        self.hostname = expand::expand_env_placeholders(&self.hostname);
        self.username = expand::expand_env_placeholders(&self.username);
        self.private_key_path = self
            .private_key_path
            .map(|s| expand::expand_tilde(&expand::expand_env_placeholders(&s)));
        self.password = self.password.map(|s| expand::expand_env_placeholders(&s));
        self
    }
}

fn default_port() -> u16 {
    22
}

/// Top-level engine configuration (SPEC_FULL.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub server: HttpConfig,
    pub websocket: WebSocketConfig,
    pub discovery: DiscoveryConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default = "default_http_host")]
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketConfig {
    #[serde(default = "default_ws_path")]
    pub path: String,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfig {
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
    #[serde(default)]
    pub include_non_assistant: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default = "default_token_expiry_s")]
    pub token_expiry_s: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
}

fn default_http_port() -> u16 {
    8787
}
fn default_http_host() -> String {
    "127.0.0.1".to_string()
}
fn default_ws_path() -> String {
    "/ws".to_string()
}
fn default_heartbeat_ms() -> u64 {
    30_000
}
fn default_poll_ms() -> u64 {
    2000
}
fn default_token_expiry_s() -> u64 {
    3600
}

/// Minimum allowed discovery poll interval (SPEC_FULL.md §4.4, §8).
pub const MIN_POLL_MS: u64 = 500;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: HttpConfig {
                port: default_http_port(),
                host: default_http_host(),
            },
            websocket: WebSocketConfig {
                path: default_ws_path(),
                heartbeat_ms: default_heartbeat_ms(),
            },
            discovery: DiscoveryConfig {
                poll_ms: default_poll_ms(),
                include_non_assistant: false,
            },
            auth: AuthConfig {
                enabled: false,
                secret: None,
                token_expiry_s: default_token_expiry_s(),
                username: None,
                password_hash: None,
            },
        }
    }
}

/// Validate a loaded [`ServerConfig`]. Called once at startup; failures
/// prevent boot (SPEC_FULL.md §7, "Configuration").
pub fn validate_server_config(config: &ServerConfig) -> Result<(), CoreError> {
    if config.discovery.poll_ms < MIN_POLL_MS {
        return Err(CoreError::Config(format!(
            "discovery.poll_ms must be >= {MIN_POLL_MS}, got {}",
            config.discovery.poll_ms
        )));
    }
    if config.server.port == 0 {
        return Err(CoreError::Config("server.port must be non-zero".into()));
    }
    if config.auth.enabled && config.auth.secret.as_deref().unwrap_or("").is_empty() {
        return Err(CoreError::Config(
            "auth.secret is required when auth.enabled is true".into(),
        ));
    }
    Ok(())
}

/// Validate a single host config entry as submitted to `POST /api/hosts`.
pub fn validate_host_config(host: &HostConfig, existing_ids: &[&str]) -> Result<(), CoreError> {
    if host.id.is_empty() {
        return Err(CoreError::Config("host id is required".into()));
    }
    if existing_ids.contains(&host.id.as_str()) {
        return Err(CoreError::Config(format!(
            "host id '{}' already exists",
            host.id
        )));
    }
    if host.hostname.is_empty() {
        return Err(CoreError::Config("host hostname is required".into()));
    }
    if host.username.is_empty() {
        return Err(CoreError::Config("host username is required".into()));
    }
    if !(1..=65535).contains(&host.port) {
        return Err(CoreError::Config(format!(
            "host port must be in 1..65535, got {}",
            host.port
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(id: &str) -> HostConfig {
        HostConfig {
            id: id.to_string(),
            name: "Test Host".to_string(),
            hostname: "example.com".to_string(),
            port: 22,
            username: "deploy".to_string(),
            private_key_path: None,
            password: None,
            password_env_var: None,
            passphrase: None,
            passphrase_env_var: None,
            use_agent: false,
            jump_host: None,
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_server_config(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn poll_ms_at_500_accepted() {
        let mut cfg = ServerConfig::default();
        cfg.discovery.poll_ms = 500;
        assert!(validate_server_config(&cfg).is_ok());
    }

    #[test]
    fn poll_ms_at_499_rejected() {
        let mut cfg = ServerConfig::default();
        cfg.discovery.poll_ms = 499;
        assert!(validate_server_config(&cfg).is_err());
    }

    #[test]
    fn auth_enabled_without_secret_rejected() {
        let mut cfg = ServerConfig::default();
        cfg.auth.enabled = true;
        cfg.auth.secret = None;
        assert!(validate_server_config(&cfg).is_err());
    }

    #[test]
    fn auth_enabled_with_secret_accepted() {
        let mut cfg = ServerConfig::default();
        cfg.auth.enabled = true;
        cfg.auth.secret = Some("s3cret".to_string());
        assert!(validate_server_config(&cfg).is_ok());
    }

    #[test]
    fn host_config_port_out_of_range_rejected() {
        let mut h = host("db1");
        h.port = 0;
        assert!(validate_host_config(&h, &[]).is_err());
        h.port = 70000;
        assert!(validate_host_config(&h, &[]).is_err());
    }

    #[test]
    fn host_config_duplicate_id_rejected() {
        let h = host("db1");
        assert!(validate_host_config(&h, &["db1", "web1"]).is_err());
    }

    #[test]
    fn host_config_valid() {
        let h = host("db1");
        assert!(validate_host_config(&h, &["web1"]).is_ok());
    }

    #[test]
    fn local_id_recognized() {
        let mut h = host(HostConfig::LOCAL_ID);
        h.hostname = String::new();
        assert!(h.is_local());
    }
}
