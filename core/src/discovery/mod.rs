//! Session Discovery Engine (SPEC_FULL.md §4.4).
//!
//! Drives the periodic fan-out refresh across the local host and every
//! configured remote host, enriches local panes with metadata, joins the
//! result against the persisted binding map, and publishes immutable
//! snapshots to subscribers. Host failures are isolated per SPEC_FULL.md
//! §4.4/§9: a failing host contributes an empty list and is logged, the
//! cycle never aborts.

pub mod classify;
pub mod signals;

use std::collections::HashMap;
use std::process::Command;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::warn;

use crate::config::HostConfig;
use crate::connection::HostConnectionManager;
use crate::mux;
use crate::persistence::PersistenceStore;
use crate::session::{
    AssistantOperationStatus, Dimensions, Enrichment, HostSummary, MuxCoordinates, ProcessInfo, Session, SessionId,
    SessionStatus,
};

use classify::OperationStatusInputs;

const ASSISTANT_NAME: &str = "claude";
const RECENT_BUFFER_LINES: u32 = 50;

/// A session the Discovery Engine found on a host but that is not (yet)
/// bound into the engine's managed set — used for the attach dialog.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableSession {
    pub mux_session_id: String,
    pub session_name: String,
    pub pane_id: String,
    pub window_index: u32,
    pub hidden: bool,
}

fn run_local(command: &str) -> (i32, String, String) {
    match Command::new("sh").arg("-c").arg(command).output() {
        Ok(output) => (
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
        ),
        Err(e) => (-1, String::new(), e.to_string()),
    }
}

fn now_iso() -> String {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    format!("unix:{secs}")
}

pub struct DiscoveryEngine {
    connections: Arc<HostConnectionManager>,
    persistence: Arc<PersistenceStore>,
    hosts: Vec<HostConfig>,
    include_non_assistant: bool,
    previous: std::sync::Mutex<HashMap<String, Session>>,
    publisher: watch::Sender<Vec<Session>>,
}

impl DiscoveryEngine {
    pub fn new(connections: Arc<HostConnectionManager>, persistence: Arc<PersistenceStore>, hosts: Vec<HostConfig>, include_non_assistant: bool) -> Self {
        let (publisher, _) = watch::channel(Vec::new());
        Self {
            connections,
            persistence,
            hosts,
            include_non_assistant,
            previous: std::sync::Mutex::new(HashMap::new()),
            publisher,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Session>> {
        self.publisher.subscribe()
    }

    /// Run one refresh cycle end to end and publish the result.
    /// SPEC_FULL.md §9: cycles never overlap; callers are expected to
    /// gate concurrent invocations with a single-task driver.
    pub async fn run_cycle(&self) -> Vec<Session> {
        let mut raw_sessions = Vec::new();
        for host in &self.hosts {
            let sessions = if host.is_local() {
                self.enumerate_host(host, true).await
            } else {
                self.enumerate_host(host, false).await
            };
            raw_sessions.extend(sessions);
        }

        let mut by_id: HashMap<String, Session> = raw_sessions.into_iter().map(|s| (s.id.0.clone(), s)).collect();

        // Mark missing managed sessions as terminated, reusing the prior record.
        let bindings = self.persistence.binding_map();
        let previous = self.previous.lock().unwrap().clone();
        for (session_id, _) in bindings.iter() {
            if !by_id.contains_key(session_id) {
                if let Some(mut prior) = previous.get(session_id).cloned() {
                    prior.status = SessionStatus::Terminated;
                    by_id.insert(session_id.clone(), prior);
                }
            }
        }

        // Join with the binding map.
        for (session_id, workspace_id) in bindings.iter() {
            if let Some(session) = by_id.get_mut(session_id) {
                session.workspace_id = workspace_id.clone();
            }
        }

        let mut snapshot: Vec<Session> = by_id.values().cloned().collect();
        snapshot.sort_by(|a, b| a.id.0.cmp(&b.id.0));

        *self.previous.lock().unwrap() = by_id;
        let _ = self.publisher.send(snapshot.clone());
        snapshot
    }

    /// `publishable()` filters to managed, non-hidden sessions unless
    /// `include_hidden` is requested (SPEC_FULL.md §4.4 "Publication").
    pub fn publishable(&self, snapshot: &[Session], include_hidden: bool) -> Vec<Session> {
        let bindings = self.persistence.binding_map();
        let hidden = self.persistence.hidden_ids();
        snapshot
            .iter()
            .filter(|s| bindings.contains_key(&s.id.0))
            .filter(|s| include_hidden || !hidden.iter().any(|h| h == &s.id.0))
            .cloned()
            .collect()
    }

    async fn enumerate_host(&self, host: &HostConfig, enrich: bool) -> Vec<Session> {
        let mux_sessions = match self.list_mux_sessions(host) {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(host = %host.id, error = %e, "discovery cycle skipping host");
                return Vec::new();
            }
        };

        let mut sessions = Vec::new();
        for mux_session in mux_sessions {
            let panes = match self.list_panes(host, &mux_session.session_name) {
                Ok(panes) => panes,
                Err(e) => {
                    warn!(host = %host.id, session = %mux_session.session_name, error = %e, "failed to list panes");
                    continue;
                }
            };
            for pane in panes {
                let session_id = SessionId::new(&host.id, &mux_session.mux_session_id, &pane.pane_id);
                let mut is_assistant_session = classify::is_assistant_command(&pane.current_command, ASSISTANT_NAME);
                if !is_assistant_session {
                    is_assistant_session = self.deep_classify(host, &mux_session.session_name, pane.pid);
                }
                if !is_assistant_session && !self.include_non_assistant {
                    continue;
                }

                let enrichment = if enrich {
                    self.enrich_pane(
                        host,
                        &mux_session.session_name,
                        &pane.pane_id,
                        is_assistant_session,
                        &pane.current_path,
                    )
                } else {
                    Enrichment::default()
                };

                sessions.push(Session {
                    id: session_id,
                    name: mux_session.session_name.clone(),
                    host: HostSummary { id: host.id.clone(), name: host.name.clone() },
                    mux: MuxCoordinates {
                        session_id: mux_session.mux_session_id.clone(),
                        session_name: mux_session.session_name.clone(),
                        pane_id: pane.pane_id.clone(),
                        window_index: pane.window_index,
                    },
                    status: SessionStatus::Active,
                    is_assistant_session,
                    process: ProcessInfo { pid: pane.pid, current_command: pane.current_command.clone() },
                    created_at: now_iso(),
                    last_activity_at: now_iso(),
                    dimensions: Dimensions { cols: pane.width as u16, rows: pane.height as u16 },
                    working_directory: pane.current_path.clone(),
                    workspace_id: None,
                    enrichment,
                });
            }
        }
        sessions
    }

    /// Deep classifier fallback (SPEC_FULL.md §4.4): when the session name
    /// hints at an assistant session but the fast current-command check
    /// missed it, search the pane's child processes for the assistant
    /// binary.
    fn deep_classify(&self, host: &HostConfig, session_name: &str, pid: u32) -> bool {
        if !session_name.to_lowercase().contains(ASSISTANT_NAME) {
            return false;
        }
        let Ok((_, children, _)) = self.run_command(host, &format!("pgrep -P {pid} -a")) else {
            return false;
        };
        classify::deep_classify_from_children(session_name, &children, ASSISTANT_NAME)
    }

    fn list_mux_sessions(&self, host: &HostConfig) -> Result<Vec<mux::MuxSessionSummary>, String> {
        let command = mux::build_list_sessions_command();
        let (exit, stdout, _stderr) = self.run_command(host, &command)?;
        if exit != 0 {
            return Ok(Vec::new());
        }
        Ok(mux::parse_list_sessions(&stdout))
    }

    fn list_panes(&self, host: &HostConfig, session_name: &str) -> Result<Vec<mux::MuxPane>, String> {
        let command = mux::build_list_panes_command(session_name);
        let (_exit, stdout, _stderr) = self.run_command(host, &command)?;
        Ok(mux::parse_list_panes(&stdout))
    }

    /// Run a command against `host` (local shell or the Host Connection
    /// Manager's `exec`). Exposed so the HTTP Control Surface can drive
    /// mux mutation commands (`new-session`, `kill-session`) through the
    /// same path discovery itself uses.
    pub fn run_command(&self, host: &HostConfig, command: &str) -> Result<(i32, String, String), String> {
        if host.is_local() {
            Ok(run_local(command))
        } else {
            self.connections.ensure_connected(host).map_err(|e| e.to_string())?;
            self.connections.exec(&host.id, command).map_err(|e| e.to_string())
        }
    }

    /// Local-only enrichment (SPEC_FULL.md §4.4 step 3): last output
    /// line, status bar, user-last-input, and assistant operation status.
    /// Conversation-summary scanning and the activity-file/HUD levels of
    /// the operation-status classifier require reading the assistant's
    /// project directory, which this function performs directly since it
    /// only ever runs against the local host.
    fn enrich_pane(
        &self,
        host: &HostConfig,
        session_name: &str,
        pane_id: &str,
        is_assistant_session: bool,
        working_directory: &str,
    ) -> Enrichment {
        let last_line_cmd = mux::build_capture_last_line_command(session_name, pane_id);
        let last_output_line = self
            .run_command(host, &last_line_cmd)
            .ok()
            .and_then(|(_, out, _)| mux::parse_capture_last_line(&out));

        let status_bar_cmd = mux::build_capture_status_bar_command(session_name);
        let status_bar = self
            .run_command(host, &status_bar_cmd)
            .ok()
            .map(|(_, out, _)| mux::parse_capture_status_bar(&out))
            .filter(|s| !s.is_empty());

        let recent_cmd = mux::build_capture_recent_buffer_command(session_name, pane_id, RECENT_BUFFER_LINES);
        let recent_lines = self
            .run_command(host, &recent_cmd)
            .ok()
            .map(|(_, out, _)| mux::parse_capture_recent_buffer(&out))
            .unwrap_or_default();

        let user_last_input = classify::extract_user_last_input(&recent_lines);

        let (conversation_summary, assistant_operation_status) = if is_assistant_session {
            let last_five: Vec<String> = recent_lines.iter().rev().take(5).cloned().collect();
            let (hud_present_with_spinner, hud_state_active) = signals::omc_hud_state(working_directory);
            let inputs = OperationStatusInputs {
                last_lines: &last_five,
                activity_file_modified_recently: signals::activity_file_modified_recently(working_directory),
                hud_present_with_spinner,
                hud_state_active,
            };
            (
                signals::conversation_summary(working_directory),
                Some(classify::classify_operation_status(&inputs)),
            )
        } else {
            (None, None)
        };

        Enrichment {
            last_output_line,
            status_bar,
            conversation_summary,
            user_last_input,
            assistant_operation_status,
        }
    }

    pub fn list_available_for(&self, host_id: &str) -> Vec<AvailableSession> {
        let Some(host) = self.hosts.iter().find(|h| h.id == host_id) else {
            return Vec::new();
        };
        let Ok(mux_sessions) = self.list_mux_sessions(host) else {
            return Vec::new();
        };
        let bindings = self.persistence.binding_map();
        let hidden = self.persistence.hidden_ids();

        let mut available = Vec::new();
        for mux_session in mux_sessions {
            let Ok(panes) = self.list_panes(host, &mux_session.session_name) else { continue };
            for pane in panes {
                let session_id = SessionId::new(host_id, &mux_session.mux_session_id, &pane.pane_id);
                let is_hidden = hidden.iter().any(|h| h == &session_id.0);
                let is_managed = bindings.contains_key(&session_id.0);
                if is_managed && !is_hidden {
                    continue;
                }
                available.push(AvailableSession {
                    mux_session_id: mux_session.mux_session_id.clone(),
                    session_name: mux_session.session_name.clone(),
                    pane_id: pane.pane_id,
                    window_index: pane.window_index,
                    hidden: is_hidden,
                });
            }
        }
        available
    }

    // --- mutation operations (SPEC_FULL.md §4.4) ---

    pub fn add_managed(&self, session_id: &str, workspace_id: Option<String>) -> Result<(), crate::persistence::PersistenceError> {
        self.persistence.add_managed(session_id, workspace_id)
    }

    pub fn remove_managed(&self, session_id: &str) -> Result<(), crate::persistence::PersistenceError> {
        self.persistence.remove_managed(session_id)
    }

    pub fn set_workspace(&self, session_id: &str, workspace_id: Option<String>) -> Result<(), crate::persistence::PersistenceError> {
        self.persistence.set_workspace(session_id, workspace_id)
    }

    pub fn hide(&self, session_id: &str) -> Result<(), crate::persistence::PersistenceError> {
        self.persistence.hide(session_id)
    }

    pub fn unhide(&self, session_id: &str) -> Result<(), crate::persistence::PersistenceError> {
        self.persistence.unhide(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine(hosts: Vec<HostConfig>) -> (TempDir, DiscoveryEngine) {
        let dir = TempDir::new().unwrap();
        let persistence = Arc::new(PersistenceStore::new(dir.path().to_path_buf()));
        let connections = Arc::new(HostConnectionManager::new());
        (dir, DiscoveryEngine::new(connections, persistence, hosts, false))
    }

    fn local_host() -> HostConfig {
        HostConfig {
            id: HostConfig::LOCAL_ID.to_string(),
            name: "Local".into(),
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
        }
    }

    #[tokio::test]
    async fn cycle_with_no_mux_running_yields_empty_snapshot() {
        let (_dir, engine) = engine(vec![local_host()]);
        let snapshot = engine.run_cycle().await;
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn failing_host_does_not_abort_the_cycle() {
        let mut bad_host = local_host();
        bad_host.id = "unreachable".into();
        bad_host.hostname = "240.0.0.1".into();
        bad_host.port = 65535;
        let (_dir, engine) = engine(vec![local_host(), bad_host]);
        let snapshot = engine.run_cycle().await;
        assert!(snapshot.is_empty());
    }

    #[test]
    fn publishable_filters_to_managed_and_non_hidden() {
        let (_dir, engine) = engine(vec![local_host()]);
        engine.add_managed("local:$0:%0", None).unwrap();
        engine.add_managed("local:$0:%1", None).unwrap();
        engine.hide("local:$0:%1").unwrap();

        let snapshot = vec![
            make_session("local:$0:%0"),
            make_session("local:$0:%1"),
            make_session("local:$0:%2"),
        ];
        let published = engine.publishable(&snapshot, false);
        let ids: Vec<&str> = published.iter().map(|s| s.id.0.as_str()).collect();
        assert_eq!(ids, vec!["local:$0:%0"]);
    }

    #[test]
    fn publishable_includes_hidden_when_requested() {
        let (_dir, engine) = engine(vec![local_host()]);
        engine.add_managed("local:$0:%1", None).unwrap();
        engine.hide("local:$0:%1").unwrap();

        let snapshot = vec![make_session("local:$0:%1")];
        let published = engine.publishable(&snapshot, true);
        assert_eq!(published.len(), 1);
    }

    fn make_session(id: &str) -> Session {
        Session {
            id: SessionId(id.to_string()),
            name: "main".into(),
            host: HostSummary { id: "local".into(), name: "Local".into() },
            mux: MuxCoordinates { session_id: "$0".into(), session_name: "main".into(), pane_id: "%0".into(), window_index: 0 },
            status: SessionStatus::Active,
            is_assistant_session: false,
            process: ProcessInfo { pid: 1, current_command: "bash".into() },
            created_at: "now".into(),
            last_activity_at: "now".into(),
            dimensions: Dimensions { cols: 80, rows: 24 },
            working_directory: "/tmp".into(),
            workspace_id: None,
            enrichment: Enrichment::default(),
        }
    }
}
