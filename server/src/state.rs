//! The single shared `AppState` value (SPEC_FULL.md §5, Design Note #3).
//!
//! One value, cloned cheaply (every field is an `Arc`), threaded through
//! every axum handler and the WebSocket hub. There is no per-request or
//! per-connection global state outside of it.

use std::collections::HashMap;
use std::sync::Arc;

use session_manager_core::bridge::BridgeRegistry;
use session_manager_core::config::{HostConfig, ServerConfig};
use session_manager_core::connection::HostConnectionManager;
use session_manager_core::discovery::DiscoveryEngine;
use session_manager_core::persistence::PersistenceStore;

use crate::hub::ClientRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub hosts: Arc<std::sync::RwLock<HashMap<String, HostConfig>>>,
    pub connections: Arc<HostConnectionManager>,
    pub persistence: Arc<PersistenceStore>,
    pub discovery: Arc<DiscoveryEngine>,
    pub bridges: Arc<BridgeRegistry>,
    pub clients: Arc<ClientRegistry>,
}

impl AppState {
    pub fn host(&self, id: &str) -> Option<HostConfig> {
        self.hosts.read().unwrap().get(id).cloned()
    }

    pub fn host_ids(&self) -> Vec<String> {
        self.hosts.read().unwrap().keys().cloned().collect()
    }

    pub fn hosts_snapshot(&self) -> Vec<HostConfig> {
        self.hosts.read().unwrap().values().cloned().collect()
    }

    pub fn insert_host(&self, host: HostConfig) {
        self.hosts.write().unwrap().insert(host.id.clone(), host);
    }

    pub fn remove_host(&self, id: &str) {
        self.hosts.write().unwrap().remove(id);
    }
}
