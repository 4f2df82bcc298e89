//! Client Fan-out Hub (SPEC_FULL.md §4.6).
//!
//! One WebSocket endpoint, many clients, many sessions. Each client
//! tracks its own subscription set; the hub keeps no other state across
//! a reconnect — a client that reconnects simply re-sends `subscribe`
//! for whatever it cares about. Grounded on the WebSocket terminal
//! bridge in `attractor-web`'s `server/terminal.rs` (split sender/receiver,
//! binary PTY frames, a JSON control message interleaved on the same
//! socket) generalized from one fixed PTY per socket to many named
//! sessions multiplexed over one socket.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use session_manager_core::connection::traits::OutputSink;
use session_manager_core::session::{Session, SessionId};

use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum InboundMessage {
    Subscribe { #[serde(rename = "sessionId")] session_id: String },
    Unsubscribe { #[serde(rename = "sessionId")] session_id: String },
    Input { #[serde(rename = "sessionId")] session_id: String, data: String },
    Resize { #[serde(rename = "sessionId")] session_id: String, cols: u16, rows: u16 },
    ListSessions,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundMessage {
    Sessions {
        sessions: Vec<Session>,
    },
    Output {
        #[serde(rename = "sessionId")]
        session_id: String,
        data: String,
    },
    Buffer {
        #[serde(rename = "sessionId")]
        session_id: String,
        data: Vec<String>,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

struct ClientHandle {
    sender: mpsc::UnboundedSender<OutboundMessage>,
    subscriptions: Mutex<HashSet<String>>,
}

/// Tracks every connected client's subscriptions and implements
/// [`OutputSink`] so a [`session_manager_core::bridge::BridgeRegistry`]
/// can push bytes here without knowing about WebSockets.
#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<String, Arc<ClientHandle>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, client_id: &str) -> mpsc::UnboundedReceiver<OutboundMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Arc::new(ClientHandle {
            sender: tx,
            subscriptions: Mutex::new(HashSet::new()),
        });
        self.clients.lock().unwrap().insert(client_id.to_string(), handle);
        rx
    }

    fn unregister(&self, client_id: &str) -> HashSet<String> {
        match self.clients.lock().unwrap().remove(client_id) {
            Some(handle) => handle.subscriptions.lock().unwrap().clone(),
            None => HashSet::new(),
        }
    }

    fn mark_subscribed(&self, client_id: &str, session_id: &str) {
        if let Some(handle) = self.clients.lock().unwrap().get(client_id) {
            handle.subscriptions.lock().unwrap().insert(session_id.to_string());
        }
    }

    fn mark_unsubscribed(&self, client_id: &str, session_id: &str) {
        if let Some(handle) = self.clients.lock().unwrap().get(client_id) {
            handle.subscriptions.lock().unwrap().remove(session_id);
        }
    }

    fn send_to(&self, client_id: &str, message: OutboundMessage) {
        if let Some(handle) = self.clients.lock().unwrap().get(client_id) {
            let _ = handle.sender.send(message);
        }
    }

    /// Broadcast a fresh Discovery snapshot to every connected client
    /// (SPEC_FULL.md §4.6, "Broadcast").
    pub fn broadcast_sessions(&self, sessions: Vec<Session>) {
        let clients = self.clients.lock().unwrap();
        for handle in clients.values() {
            let _ = handle.sender.send(OutboundMessage::Sessions { sessions: sessions.clone() });
        }
    }

    fn subscribers_of(&self, session_id: &str) -> Vec<String> {
        self.clients
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, h)| h.subscriptions.lock().unwrap().contains(session_id))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

impl OutputSink for ClientRegistry {
    fn send_output(&self, session_id: &SessionId, data: &[u8]) {
        let text = String::from_utf8_lossy(data).to_string();
        for client_id in self.subscribers_of(&session_id.0) {
            self.send_to(
                &client_id,
                OutboundMessage::Output {
                    session_id: session_id.0.clone(),
                    data: text.clone(),
                },
            );
        }
    }

    fn send_exit(&self, session_id: &SessionId, exit_code: Option<i32>) {
        let message = match exit_code {
            Some(code) => format!("session {session_id} exited with code {code}"),
            None => format!("session {session_id} ended"),
        };
        for client_id in self.subscribers_of(&session_id.0) {
            self.send_to(
                &client_id,
                OutboundMessage::Error {
                    message: message.clone(),
                    code: Some("session_ended".to_string()),
                },
            );
        }
    }

    fn send_error(&self, session_id: &SessionId, message: &str) {
        for client_id in self.subscribers_of(&session_id.0) {
            self.send_to(
                &client_id,
                OutboundMessage::Error {
                    message: message.to_string(),
                    code: Some("bridge_error".to_string()),
                },
            );
        }
    }
}

fn new_client_id() -> String {
    use rand::Rng;
    let n: u64 = rand::thread_rng().gen();
    format!("client-{n:016x}")
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let client_id = new_client_id();
    let mut out_rx = state.clients.register(&client_id);
    info!(client = %client_id, "websocket client connected");

    let (mut sender, mut receiver) = socket.split();
    let alive = Arc::new(AtomicBool::new(true));
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                match outbound {
                    Some(message) => {
                        let Ok(json) = serde_json::to_string(&message) else { continue };
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(&text, &client_id, &state).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        alive.store(true, Ordering::SeqCst);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(client = %client_id, error = %e, "websocket read error");
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if !alive.swap(false, Ordering::SeqCst) {
                    warn!(client = %client_id, "heartbeat missed, closing connection");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let subscriptions = state.clients.unregister(&client_id);
    for session_id in subscriptions {
        state.bridges.unsubscribe(&session_id, &client_id);
    }
    info!(client = %client_id, "websocket client disconnected");
}

async fn handle_inbound(text: &str, client_id: &str, state: &AppState) {
    let message: InboundMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            state.clients.send_to(
                client_id,
                OutboundMessage::Error {
                    message: format!("malformed message: {e}"),
                    code: Some("bad_request".to_string()),
                },
            );
            return;
        }
    };

    match message {
        InboundMessage::Subscribe { session_id } => subscribe(client_id, &session_id, state).await,
        InboundMessage::Unsubscribe { session_id } => {
            state.bridges.unsubscribe(&session_id, client_id);
            state.clients.mark_unsubscribed(client_id, &session_id);
        }
        InboundMessage::Input { session_id, data } => {
            if let Err(e) = state.bridges.input(&session_id, data.as_bytes()) {
                state.clients.send_to(
                    client_id,
                    OutboundMessage::Error { message: e.to_string(), code: Some("input_failed".to_string()) },
                );
            }
        }
        InboundMessage::Resize { session_id, cols, rows } => {
            if let Err(e) = state.bridges.resize(&session_id, cols, rows) {
                state.clients.send_to(
                    client_id,
                    OutboundMessage::Error { message: e.to_string(), code: Some("resize_failed".to_string()) },
                );
            }
        }
        InboundMessage::ListSessions => {
            let snapshot = state.discovery.subscribe().borrow().clone();
            let published = state.discovery.publishable(&snapshot, false);
            state.clients.send_to(client_id, OutboundMessage::Sessions { sessions: published });
        }
    }
}

async fn subscribe(client_id: &str, session_id: &str, state: &AppState) {
    let snapshot = state.discovery.subscribe().borrow().clone();
    let Some(session) = snapshot.iter().find(|s| s.id.0 == session_id) else {
        state.clients.send_to(
            client_id,
            OutboundMessage::Error {
                message: format!("unknown session: {session_id}"),
                code: Some("not_found".to_string()),
            },
        );
        return;
    };

    let result = state
        .bridges
        .subscribe(
            &session.id,
            &session.host.id,
            session.is_assistant_session,
            client_id,
            session.dimensions.cols,
            session.dimensions.rows,
            Some(&session.working_directory),
        )
        .await;

    match result {
        Ok((_, buffer)) => {
            state.clients.mark_subscribed(client_id, session_id);
            state.clients.send_to(client_id, OutboundMessage::Buffer { session_id: session_id.to_string(), data: buffer });
        }
        Err(e) => {
            state.clients.send_to(
                client_id,
                OutboundMessage::Error { message: e.to_string(), code: Some("bridge_open_failed".to_string()) },
            );
        }
    }
}
