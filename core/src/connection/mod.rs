//! Host Connection Manager (SPEC_FULL.md §4.2).
//!
//! Owns the set of live connections to configured hosts (SSH, or the
//! local pseudo-host) and presents a uniform contract to the rest of the
//! engine: `connect`/`exec`/`open_shell`/`test_direct`/`disconnect`/
//! `disconnect_all`. Dispatch between the `ssh2` library path and the
//! native `ssh` process fallback follows [`auth::requires_native_fallback`]
//! (Open Question 2).

pub mod auth;
pub mod local;
pub mod native_ssh;
pub mod ssh_client;
pub mod state;
pub mod traits;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::HostConfig;
use state::{ConnectionEvent, ConnectionState, Effect};
use traits::ProcessHandle;

pub type OutputReceiver = tokio::sync::mpsc::Receiver<Vec<u8>>;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("host unreachable: {0}")]
    Unreachable(String),
    #[error("ssh handshake failed: {0}")]
    Handshake(String),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("no auth method configured for host '{0}'")]
    NoAuthMethod(String),
    #[error("host '{0}' is not connected")]
    NotConnected(String),
    #[error("host '{0}' is already connected")]
    AlreadyConnected(String),
    #[error(transparent)]
    Io(String),
}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        ConnectionError::Io(e.to_string())
    }
}

/// An established connection to one configured host.
enum ActiveConnection {
    Local,
    Ssh(ssh_client::SshClient),
    /// The host requires the native `ssh` fallback; no persistent
    /// `ssh2::Session` is kept, each `open_shell` spawns its own process.
    NativeSsh,
}

/// Owns live connections keyed by host id and dispatches operations to
/// the right backend (local PTY, `ssh2`, or native `ssh` fallback).
/// Also drives the reconnect state machine (`state::transition`) so a
/// connection failure on one call doesn't leave the host permanently
/// unreachable: a background task keeps retrying with backoff until it
/// either reconnects or exhausts its attempts (SPEC_FULL.md §9, Design
/// Note #1).
pub struct HostConnectionManager {
    connections: Mutex<HashMap<String, ActiveConnection>>,
    states: Mutex<HashMap<String, ConnectionState>>,
}

impl Default for HostConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HostConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_connected(&self, host_id: &str) -> bool {
        self.connections.lock().unwrap().contains_key(host_id)
    }

    fn apply_event(&self, host_id: &str, event: ConnectionEvent) -> Option<Effect> {
        let mut states = self.states.lock().unwrap();
        let current = states.get(host_id).copied().unwrap_or(ConnectionState::Disconnected);
        let (next, effect) = state::transition(current, event);
        states.insert(host_id.to_string(), next);
        effect
    }

    fn dial(host: &HostConfig) -> Result<ActiveConnection, ConnectionError> {
        if host.is_local() {
            Ok(ActiveConnection::Local)
        } else if auth::requires_native_fallback(host) {
            Ok(ActiveConnection::NativeSsh)
        } else {
            Ok(ActiveConnection::Ssh(ssh_client::SshClient::connect(host)?))
        }
    }

    /// Establish (and remember) a connection to `host`. Idempotent: a
    /// second call for an already-connected host is a no-op rather than
    /// an error, matching the mutation operations' idempotency invariant
    /// (SPEC_FULL.md §8). Does not schedule a reconnect on failure; use
    /// [`Self::ensure_connected`] from a caller that wants that.
    pub fn connect(&self, host: &HostConfig) -> Result<(), ConnectionError> {
        if self.is_connected(&host.id) {
            return Ok(());
        }

        self.apply_event(&host.id, ConnectionEvent::ConnectRequested);
        match Self::dial(host) {
            Ok(active) => {
                self.apply_event(&host.id, ConnectionEvent::ReadyReceived);
                info!(host = %host.id, "host connected");
                self.connections.lock().unwrap().insert(host.id.clone(), active);
                Ok(())
            }
            Err(e) => {
                self.apply_event(&host.id, ConnectionEvent::ErrorOccurred);
                Err(e)
            }
        }
    }

    /// Connect on demand (SPEC_FULL.md §4.2): same as [`Self::connect`],
    /// but on failure schedules a background reconnect loop that retries
    /// with exponential backoff until it succeeds or exhausts its
    /// attempts, so the next call against this host can succeed without
    /// any caller having to drive retries itself.
    pub fn ensure_connected(self: &Arc<Self>, host: &HostConfig) -> Result<(), ConnectionError> {
        if self.is_connected(&host.id) {
            return Ok(());
        }

        self.apply_event(&host.id, ConnectionEvent::ConnectRequested);
        match Self::dial(host) {
            Ok(active) => {
                self.apply_event(&host.id, ConnectionEvent::ReadyReceived);
                info!(host = %host.id, "host connected");
                self.connections.lock().unwrap().insert(host.id.clone(), active);
                Ok(())
            }
            Err(e) => {
                if let Some(Effect::ScheduleReconnect { delay }) = self.apply_event(&host.id, ConnectionEvent::ErrorOccurred) {
                    warn!(host = %host.id, error = %e, delay = ?delay, "connect failed, reconnect scheduled");
                    self.spawn_reconnect_loop(host.clone(), delay);
                } else {
                    warn!(host = %host.id, error = %e, "connect failed");
                }
                Err(e)
            }
        }
    }

    fn spawn_reconnect_loop(self: &Arc<Self>, host: HostConfig, initial_delay: Duration) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut delay = initial_delay;
            loop {
                tokio::time::sleep(delay).await;
                manager.apply_event(&host.id, ConnectionEvent::ReconnectTimerFired);
                match Self::dial(&host) {
                    Ok(active) => {
                        manager.apply_event(&host.id, ConnectionEvent::ReadyReceived);
                        manager.connections.lock().unwrap().insert(host.id.clone(), active);
                        info!(host = %host.id, "host reconnected");
                        return;
                    }
                    Err(e) => match manager.apply_event(&host.id, ConnectionEvent::ErrorOccurred) {
                        Some(Effect::ScheduleReconnect { delay: next_delay }) => {
                            warn!(host = %host.id, error = %e, "reconnect attempt failed, retrying");
                            delay = next_delay;
                        }
                        _ => {
                            warn!(host = %host.id, error = %e, "reconnect attempts exhausted");
                            return;
                        }
                    },
                }
            }
        });
    }

    /// Attempt a connection without storing it — used by the HTTP
    /// Control Surface's "test connection" endpoint.
    pub fn test_direct(&self, host: &HostConfig) -> Result<(), ConnectionError> {
        if host.is_local() {
            return Ok(());
        }
        if auth::requires_native_fallback(host) {
            // The native fallback path needs an interactive PTY to prove
            // itself; a lightweight reachability check is the best this
            // entry point can do without actually opening a shell.
            std::net::TcpStream::connect((host.hostname.as_str(), host.port))
                .map_err(|e| ConnectionError::Unreachable(format!("{}: {e}", host.hostname)))?;
            return Ok(());
        }
        let client = ssh_client::SshClient::connect(host)?;
        client.disconnect();
        Ok(())
    }

    pub fn exec(&self, host_id: &str, command: &str) -> Result<(i32, String, String), ConnectionError> {
        let connections = self.connections.lock().unwrap();
        match connections.get(host_id) {
            Some(ActiveConnection::Ssh(client)) => client.exec(command),
            Some(ActiveConnection::Local) => Err(ConnectionError::Io(
                "exec against the local host is handled by the local PTY spawner, not exec()".into(),
            )),
            Some(ActiveConnection::NativeSsh) => Err(ConnectionError::Io(
                "exec is not supported over the native ssh fallback; use open_shell".into(),
            )),
            None => Err(ConnectionError::NotConnected(host_id.to_string())),
        }
    }

    /// Open an interactive PTY shell backing a bridged session
    /// (SPEC_FULL.md §4.5).
    pub fn open_shell(
        &self,
        host: &HostConfig,
        cols: u16,
        rows: u16,
        working_dir: Option<&str>,
    ) -> Result<(Box<dyn ProcessHandle>, OutputReceiver), ConnectionError> {
        if host.is_local() {
            let (handle, rx) = local::open_shell(cols, rows, working_dir)?;
            return Ok((Box::new(handle), rx));
        }

        let connections = self.connections.lock().unwrap();
        match connections.get(&host.id) {
            Some(ActiveConnection::Ssh(client)) => {
                let (handle, rx) = client.open_shell(cols, rows)?;
                Ok((Box::new(handle), rx))
            }
            Some(ActiveConnection::NativeSsh) => {
                let (handle, rx) = native_ssh::open_shell(host)?;
                Ok((Box::new(handle), rx))
            }
            Some(ActiveConnection::Local) => unreachable!("local hosts are handled above"),
            None => Err(ConnectionError::NotConnected(host.id.clone())),
        }
    }

    pub fn disconnect(&self, host_id: &str) {
        let mut connections = self.connections.lock().unwrap();
        if let Some(ActiveConnection::Ssh(client)) = connections.remove(host_id) {
            client.disconnect();
        }
        self.states.lock().unwrap().remove(host_id);
        info!(host = %host_id, "host disconnected");
    }

    pub fn disconnect_all(&self) {
        let ids: Vec<String> = self.connections.lock().unwrap().keys().cloned().collect();
        warn!(count = ids.len(), "disconnecting all hosts");
        for id in ids {
            self.disconnect(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(id: &str) -> HostConfig {
        HostConfig {
            id: id.to_string(),
            name: "Test".into(),
            hostname: "example.com".into(),
            port: 22,
            username: "deploy".into(),
            private_key_path: None,
            password: None,
            password_env_var: None,
            passphrase: None,
            passphrase_env_var: None,
            use_agent: true,
            jump_host: None,
        }
    }

    #[test]
    fn local_host_connects_without_network() {
        let manager = HostConnectionManager::new();
        let local = host(HostConfig::LOCAL_ID);
        manager.connect(&local).unwrap();
        assert!(manager.is_connected(HostConfig::LOCAL_ID));
    }

    #[test]
    fn connecting_twice_is_idempotent() {
        let manager = HostConnectionManager::new();
        let local = host(HostConfig::LOCAL_ID);
        manager.connect(&local).unwrap();
        manager.connect(&local).unwrap();
        assert!(manager.is_connected(HostConfig::LOCAL_ID));
    }

    #[test]
    fn exec_against_unconnected_host_errors() {
        let manager = HostConnectionManager::new();
        let result = manager.exec("never-connected", "echo hi");
        assert!(matches!(result, Err(ConnectionError::NotConnected(_))));
    }

    #[test]
    fn disconnect_unknown_host_is_a_noop() {
        let manager = HostConnectionManager::new();
        manager.disconnect("never-connected");
        assert!(!manager.is_connected("never-connected"));
    }

    #[test]
    fn disconnect_all_clears_every_connection() {
        let manager = HostConnectionManager::new();
        manager.connect(&host(HostConfig::LOCAL_ID)).unwrap();
        manager.disconnect_all();
        assert!(!manager.is_connected(HostConfig::LOCAL_ID));
    }
}
