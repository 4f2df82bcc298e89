//! The domain `Session` type and its system-wide identifier (SPEC_FULL.md §3).

use serde::{Deserialize, Serialize};

/// `"{host_id}:{mux_session_id}:{pane_id}"` — globally unique, stable
/// across restarts as long as the multiplexer retains the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(host_id: &str, mux_session_id: &str, pane_id: &str) -> Self {
        Self(format!("{host_id}:{mux_session_id}:{pane_id}"))
    }

    /// Split back into `(host_id, mux_session_id, pane_id)`. Returns
    /// `None` if the id does not have exactly three colon-separated parts
    /// (a malformed id should never be constructed, but callers handling
    /// externally-supplied ids must not panic on one).
    pub fn parts(&self) -> Option<(&str, &str, &str)> {
        let mut parts = self.0.splitn(3, ':');
        let host_id = parts.next()?;
        let mux_session_id = parts.next()?;
        let pane_id = parts.next()?;
        Some((host_id, mux_session_id, pane_id))
    }

    pub fn host_id(&self) -> Option<&str> {
        self.parts().map(|(h, _, _)| h)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Idle,
    Disconnected,
    Terminated,
}

/// Four-level assistant operation status (SPEC_FULL.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantOperationStatus {
    Thinking,
    WaitingForInput,
    Error,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dimensions {
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MuxCoordinates {
    pub session_id: String,
    pub session_name: String,
    pub pane_id: String,
    pub window_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub pid: u32,
    pub current_command: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrichment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_output_line: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_bar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_last_input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_operation_status: Option<AssistantOperationStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub host: HostSummary,
    pub mux: MuxCoordinates,
    pub status: SessionStatus,
    pub is_assistant_session: bool,
    pub process: ProcessInfo,
    pub created_at: String,
    pub last_activity_at: String,
    pub dimensions: Dimensions,
    pub working_directory: String,
    pub workspace_id: Option<String>,
    #[serde(flatten)]
    pub enrichment: Enrichment,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_roundtrips_parts() {
        let id = SessionId::new("web1", "$3", "%2");
        assert_eq!(id.0, "web1:$3:%2");
        assert_eq!(id.parts(), Some(("web1", "$3", "%2")));
        assert_eq!(id.host_id(), Some("web1"));
    }

    #[test]
    fn session_id_malformed_parts_is_none() {
        let id = SessionId("not-enough-colons".to_string());
        assert!(id.parts().is_none());
    }

    #[test]
    fn session_id_display_matches_inner_string() {
        let id = SessionId::new("local", "$0", "%0");
        assert_eq!(id.to_string(), "local:$0:%0");
    }

    #[test]
    fn enrichment_default_is_empty() {
        let e = Enrichment::default();
        assert!(e.last_output_line.is_none());
        assert!(e.assistant_operation_status.is_none());
    }
}
