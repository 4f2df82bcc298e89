//! Terminal Bridge (SPEC_FULL.md §4.5).
//!
//! One bridge per bound session: owns the backing [`ProcessHandle`], a
//! bounded replay buffer, and the set of subscribed client ids. Output
//! delivery is push-based through an injected [`OutputSink`] (the Client
//! Fan-out Hub in production, a recording stub in tests) so the bridge
//! never depends on WebSocket machinery directly.

pub mod ring_buffer;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

use crate::config::HostConfig;
use crate::connection::traits::{OutputSink, ProcessHandle};
use crate::connection::{ConnectionError, HostConnectionManager};
use crate::discovery::classify::{self, OperationStatusInputs};
use crate::discovery::signals;
use crate::session::{AssistantOperationStatus, SessionId};

use ring_buffer::RingBuffer;

const STATUS_WINDOW_BYTES: usize = 2048;
const STATUS_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("no bridge is open for session '{0}'")]
    NotOpen(String),
    #[error("host '{0}' is not configured")]
    UnknownHost(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Initializing,
    Connected,
    Closed,
    Errored,
}

/// One bridged session: the live process, its replay buffer, and whoever
/// is currently subscribed. `Sync`/`Send` so a reader task can hold an
/// `Arc<TerminalBridge>` alongside callers driving subscribe/input/resize.
pub struct TerminalBridge {
    session_id: SessionId,
    process: Box<dyn ProcessHandle>,
    ring: Mutex<RingBuffer>,
    subscribers: Mutex<HashSet<String>>,
    state: Mutex<BridgeState>,
    is_assistant_session: bool,
    working_directory: Option<String>,
    status_window: Mutex<Vec<u8>>,
    last_status_check: Mutex<Instant>,
    current_status: Mutex<Option<AssistantOperationStatus>>,
}

impl TerminalBridge {
    fn new(
        session_id: SessionId,
        process: Box<dyn ProcessHandle>,
        is_assistant_session: bool,
        working_directory: Option<String>,
    ) -> Self {
        Self {
            session_id,
            process,
            ring: Mutex::new(RingBuffer::new()),
            subscribers: Mutex::new(HashSet::new()),
            state: Mutex::new(BridgeState::Connected),
            is_assistant_session,
            working_directory,
            status_window: Mutex::new(Vec::new()),
            last_status_check: Mutex::new(Instant::now() - STATUS_DEBOUNCE),
            current_status: Mutex::new(None),
        }
    }

    pub fn state(&self) -> BridgeState {
        *self.state.lock().unwrap()
    }

    pub fn current_buffer(&self) -> Vec<String> {
        self.ring.lock().unwrap().read_lines()
    }

    fn add_subscriber(&self, client_id: &str) {
        self.subscribers.lock().unwrap().insert(client_id.to_string());
    }

    /// Returns `true` if removing this subscriber emptied the set — the
    /// caller must close the bridge on that transition.
    fn remove_subscriber(&self, client_id: &str) -> bool {
        let mut subs = self.subscribers.lock().unwrap();
        subs.remove(client_id);
        subs.is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    pub fn input(&self, data: &[u8]) -> Result<(), BridgeError> {
        self.process.write_input(data)?;
        Ok(())
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), BridgeError> {
        self.process.resize(cols, rows)?;
        Ok(())
    }

    pub fn current_operation_status(&self) -> Option<AssistantOperationStatus> {
        *self.current_status.lock().unwrap()
    }

    /// Feed freshly-arrived bytes into the replay buffer and, for
    /// assistant sessions, the incremental status detector
    /// (SPEC_FULL.md §4.5: sliding 2KB window, 100ms debounce).
    fn on_pty_data(&self, data: &[u8]) {
        self.ring.lock().unwrap().write(data);

        if !self.is_assistant_session {
            return;
        }

        let mut window = self.status_window.lock().unwrap();
        window.extend_from_slice(data);
        if window.len() > STATUS_WINDOW_BYTES {
            let excess = window.len() - STATUS_WINDOW_BYTES;
            window.drain(0..excess);
        }

        let mut last_check = self.last_status_check.lock().unwrap();
        if last_check.elapsed() < STATUS_DEBOUNCE {
            return;
        }
        *last_check = Instant::now();

        let text = String::from_utf8_lossy(&window);
        let last_lines: Vec<String> = text.lines().rev().take(5).map(str::to_string).collect();
        let (hud_present_with_spinner, hud_state_active) = self
            .working_directory
            .as_deref()
            .map(signals::omc_hud_state)
            .unwrap_or((false, false));
        let inputs = OperationStatusInputs {
            last_lines: &last_lines,
            activity_file_modified_recently: self
                .working_directory
                .as_deref()
                .is_some_and(signals::activity_file_modified_recently),
            hud_present_with_spinner,
            hud_state_active,
        };
        *self.current_status.lock().unwrap() = Some(classify::classify_operation_status(&inputs));
    }

    fn close(&self) {
        *self.state.lock().unwrap() = BridgeState::Closed;
        let _ = self.process.close();
    }

    fn fail(&self) {
        *self.state.lock().unwrap() = BridgeState::Errored;
        let _ = self.process.close();
    }
}

/// Owns every live [`TerminalBridge`], keyed by session id, and drives
/// the subscribe/unsubscribe lifecycle that opens and closes them
/// (SPEC_FULL.md §4.5, §4.6).
pub struct BridgeRegistry {
    connections: Arc<HostConnectionManager>,
    hosts: HashMap<String, HostConfig>,
    sink: Arc<dyn OutputSink>,
    bridges: Mutex<HashMap<String, Arc<TerminalBridge>>>,
}

impl BridgeRegistry {
    pub fn new(connections: Arc<HostConnectionManager>, hosts: HashMap<String, HostConfig>, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            connections,
            hosts,
            sink,
            bridges: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<TerminalBridge>> {
        self.bridges.lock().unwrap().get(session_id).cloned()
    }

    /// `subscribe(sessionId, clientId)` (SPEC_FULL.md §4.6). Opens the
    /// bridge on first subscribe (state `—` -> initializing -> connected);
    /// otherwise just registers the subscriber against the existing
    /// bridge. Returns the current replay buffer either way.
    pub async fn subscribe(
        &self,
        session_id: &SessionId,
        host_id: &str,
        is_assistant_session: bool,
        client_id: &str,
        cols: u16,
        rows: u16,
        working_dir: Option<&str>,
    ) -> Result<(Arc<TerminalBridge>, Vec<String>), BridgeError> {
        if let Some(bridge) = self.get(&session_id.0) {
            bridge.add_subscriber(client_id);
            let buffer = bridge.current_buffer();
            return Ok((bridge, buffer));
        }

        let host = self
            .hosts
            .get(host_id)
            .ok_or_else(|| BridgeError::UnknownHost(host_id.to_string()))?;

        if !host.is_local() {
            self.connections.ensure_connected(host)?;
        }
        let (process, mut rx) = self.connections.open_shell(host, cols, rows, working_dir)?;
        let bridge = Arc::new(TerminalBridge::new(
            session_id.clone(),
            process,
            is_assistant_session,
            working_dir.map(String::from),
        ));
        bridge.add_subscriber(client_id);
        self.bridges.lock().unwrap().insert(session_id.0.clone(), bridge.clone());
        info!(session = %session_id, "bridge opened");

        let reader_bridge = bridge.clone();
        let sink = self.sink.clone();
        let reader_session_id = session_id.clone();
        tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                reader_bridge.on_pty_data(&chunk);
                sink.send_output(&reader_session_id, &chunk);
            }
            if reader_bridge.state() == BridgeState::Connected {
                reader_bridge.close();
                sink.send_exit(&reader_session_id, None);
            }
        });

        let buffer = bridge.current_buffer();
        Ok((bridge, buffer))
    }

    /// `unsubscribe(sessionId, clientId)`. Closes the bridge once the
    /// last subscriber drops off (SPEC_FULL.md §4.5).
    pub fn unsubscribe(&self, session_id: &str, client_id: &str) {
        let bridge = match self.get(session_id) {
            Some(b) => b,
            None => return,
        };
        if bridge.remove_subscriber(client_id) {
            bridge.close();
            self.bridges.lock().unwrap().remove(session_id);
            info!(session = session_id, "bridge closed: no remaining subscribers");
        }
    }

    /// A dropped client (connection lost, not an explicit unsubscribe)
    /// removes that client from every bridge it was subscribed to
    /// (SPEC_FULL.md §4.6, "Reconnection").
    pub fn remove_client_everywhere(&self, client_id: &str) {
        let ids: Vec<String> = self.bridges.lock().unwrap().keys().cloned().collect();
        for id in ids {
            self.unsubscribe(&id, client_id);
        }
    }

    pub fn input(&self, session_id: &str, data: &[u8]) -> Result<(), BridgeError> {
        self.get(session_id).ok_or_else(|| BridgeError::NotOpen(session_id.to_string()))?.input(data)
    }

    pub fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<(), BridgeError> {
        self.get(session_id).ok_or_else(|| BridgeError::NotOpen(session_id.to_string()))?.resize(cols, rows)
    }

    /// Explicit `close(sessionId)` from any state (SPEC_FULL.md §4.5).
    pub fn close(&self, session_id: &str) {
        if let Some(bridge) = self.bridges.lock().unwrap().remove(session_id) {
            bridge.close();
        }
    }

    /// A lower layer (the Host Connection Manager's reconnect loop)
    /// observed the underlying connection fail out from under this
    /// bridge. Transitions to `Errored`, notifies subscribers, and drops
    /// the bridge (SPEC_FULL.md §4.5: "pty-exit/error -> error/closed").
    pub fn mark_errored(&self, session_id: &str, message: &str) {
        if let Some(bridge) = self.bridges.lock().unwrap().remove(session_id) {
            bridge.fail();
            self.sink.send_error(&bridge.session_id, message);
        }
    }

    pub fn close_all(&self) {
        let mut bridges = self.bridges.lock().unwrap();
        for bridge in bridges.values() {
            bridge.close();
        }
        bridges.clear();
        warn!("all bridges closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingSink {
        output_calls: AtomicUsize,
    }

    impl OutputSink for RecordingSink {
        fn send_output(&self, _session_id: &SessionId, _data: &[u8]) {
            self.output_calls.fetch_add(1, Ordering::SeqCst);
        }
        fn send_exit(&self, _session_id: &SessionId, _exit_code: Option<i32>) {}
        fn send_error(&self, _session_id: &SessionId, _message: &str) {}
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

    fn registry() -> BridgeRegistry {
        let mut hosts = HashMap::new();
        hosts.insert(HostConfig::LOCAL_ID.to_string(), local_host());
        let sink = Arc::new(RecordingSink { output_calls: AtomicUsize::new(0) });
        BridgeRegistry::new(Arc::new(HostConnectionManager::new()), hosts, sink)
    }

    #[tokio::test]
    async fn first_subscribe_opens_a_bridge() {
        let registry = registry();
        let session_id = SessionId::new("local", "$0", "%0");
        let (bridge, buffer) = registry
            .subscribe(&session_id, "local", false, "client-a", 80, 24, None)
            .await
            .unwrap();
        assert_eq!(bridge.state(), BridgeState::Connected);
        assert!(buffer.is_empty());
        assert_eq!(bridge.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn second_subscribe_reuses_the_existing_bridge() {
        let registry = registry();
        let session_id = SessionId::new("local", "$0", "%0");
        registry.subscribe(&session_id, "local", false, "client-a", 80, 24, None).await.unwrap();
        let (bridge, _) = registry
            .subscribe(&session_id, "local", false, "client-b", 80, 24, None)
            .await
            .unwrap();
        assert_eq!(bridge.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn unsubscribing_last_client_closes_the_bridge() {
        let registry = registry();
        let session_id = SessionId::new("local", "$0", "%0");
        registry.subscribe(&session_id, "local", false, "client-a", 80, 24, None).await.unwrap();
        registry.unsubscribe(&session_id.0, "client-a");
        assert!(registry.get(&session_id.0).is_none());
    }

    #[tokio::test]
    async fn unsubscribing_one_of_two_keeps_the_bridge_open() {
        let registry = registry();
        let session_id = SessionId::new("local", "$0", "%0");
        registry.subscribe(&session_id, "local", false, "client-a", 80, 24, None).await.unwrap();
        registry.subscribe(&session_id, "local", false, "client-b", 80, 24, None).await.unwrap();
        registry.unsubscribe(&session_id.0, "client-a");
        assert!(registry.get(&session_id.0).is_some());
    }

    #[tokio::test]
    async fn explicit_close_removes_the_bridge_regardless_of_subscribers() {
        let registry = registry();
        let session_id = SessionId::new("local", "$0", "%0");
        registry.subscribe(&session_id, "local", false, "client-a", 80, 24, None).await.unwrap();
        registry.close(&session_id.0);
        assert!(registry.get(&session_id.0).is_none());
    }

    #[test]
    fn status_detector_only_runs_for_assistant_sessions() {
        let process: Box<dyn ProcessHandle> = Box::new(NoopProcess);
        let bridge = TerminalBridge::new(SessionId::new("local", "$0", "%0"), process, false, None);
        bridge.on_pty_data(b"Thinking...\n");
        assert!(bridge.current_operation_status().is_none());
    }

    #[test]
    fn status_detector_classifies_thinking_marker() {
        let process: Box<dyn ProcessHandle> = Box::new(NoopProcess);
        let bridge = TerminalBridge::new(SessionId::new("local", "$0", "%0"), process, true, None);
        *bridge.last_status_check.lock().unwrap() = Instant::now() - STATUS_DEBOUNCE;
        bridge.on_pty_data(b"Running tool\xe2\x80\xa6\n");
        assert_eq!(bridge.current_operation_status(), Some(AssistantOperationStatus::Thinking));
    }

    struct NoopProcess;
    impl ProcessHandle for NoopProcess {
        fn write_input(&self, _data: &[u8]) -> Result<(), ConnectionError> {
            Ok(())
        }
        fn resize(&self, _cols: u16, _rows: u16) -> Result<(), ConnectionError> {
            Ok(())
        }
        fn close(&self) -> Result<(), ConnectionError> {
            Ok(())
        }
        fn is_alive(&self) -> bool {
            true
        }
    }
}
