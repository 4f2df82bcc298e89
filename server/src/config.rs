//! Config file loading (SPEC_FULL.md §1 Non-goals note the *shapes* live
//! in `session_manager_core::config`; this module is the one thing that
//! actually touches disk and environment to produce them).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use session_manager_core::config::{validate_host_config, validate_server_config, HostConfig, ServerConfig};

/// `~/.config/session-manager` unless overridden by `SESSION_MANAGER_HOME`.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SESSION_MANAGER_HOME") {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("session-manager")
}

/// Persisted JSON files (`workspaces.json` etc.) live alongside the
/// config, under the same directory, unless overridden.
pub fn data_dir() -> PathBuf {
    config_dir()
}

pub fn load_server_config(dir: &Path) -> Result<ServerConfig> {
    let path = dir.join("config.json");
    let config = match std::fs::read_to_string(&path) {
        Ok(contents) => serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?,
        Err(_) => ServerConfig::default(),
    };
    validate_server_config(&config).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    Ok(config)
}

/// Loads `hosts.json` (a bare array of [`HostConfig`]) and always injects
/// the `local` pseudo-host. `~` and `${env:...}` placeholders are expanded
/// eagerly so the rest of the engine never has to.
pub fn load_hosts(dir: &Path) -> Result<HashMap<String, HostConfig>> {
    let path = dir.join("hosts.json");
    let mut configured: Vec<HostConfig> = match std::fs::read_to_string(&path) {
        Ok(contents) => serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?,
        Err(_) => Vec::new(),
    };

    let mut seen_ids: Vec<String> = Vec::new();
    for host in &configured {
        let existing: Vec<&str> = seen_ids.iter().map(String::as_str).collect();
        validate_host_config(host, &existing).map_err(|e| anyhow::anyhow!(e.to_string()))?;
        seen_ids.push(host.id.clone());
    }

    let mut hosts: HashMap<String, HostConfig> = HashMap::new();
    hosts.insert(
        HostConfig::LOCAL_ID.to_string(),
        HostConfig {
            id: HostConfig::LOCAL_ID.to_string(),
            name: "Local".to_string(),
            hostname: String::new(),
            port: 22,
            username: String::new(),
            private_key_path: None,
            password: None,
            password_env_var: None,
            passphrase: None,
            passphrase_env_var: None,
            use_agent: false,
            jump_host: None,
        },
    );

    for host in configured.drain(..) {
        hosts.insert(host.id.clone(), host.expand());
    }
    Ok(hosts)
}

pub fn save_hosts(dir: &Path, hosts: &[HostConfig]) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join("hosts.json");
    let non_local: Vec<&HostConfig> = hosts.iter().filter(|h| !h.is_local()).collect();
    let json = serde_json::to_string_pretty(&non_local)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_server_config(dir.path()).unwrap();
        assert_eq!(config.server.port, 8787);
    }

    #[test]
    fn missing_hosts_file_yields_local_only() {
        let dir = TempDir::new().unwrap();
        let hosts = load_hosts(dir.path()).unwrap();
        assert_eq!(hosts.len(), 1);
        assert!(hosts.contains_key(HostConfig::LOCAL_ID));
    }

    #[test]
    fn save_then_load_round_trips_non_local_hosts() {
        let dir = TempDir::new().unwrap();
        let host = HostConfig {
            id: "web1".into(),
            name: "Web 1".into(),
            hostname: "web1.internal".into(),
            port: 22,
            username: "deploy".into(),
            private_key_path: None,
            password: None,
            password_env_var: None,
            passphrase: None,
            passphrase_env_var: None,
            use_agent: true,
            jump_host: None,
        };
        save_hosts(dir.path(), &[host]).unwrap();
        let hosts = load_hosts(dir.path()).unwrap();
        assert_eq!(hosts.len(), 2);
        assert!(hosts.contains_key("web1"));
    }
}
