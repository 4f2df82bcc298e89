//! Transport abstraction traits for terminal bridge I/O (SPEC_FULL.md §4.5).
//!
//! Generalizes `core/src/session/traits.rs`'s desktop/agent seam into a
//! local-PTY/SSH-shell seam: the Terminal Bridge reads from whichever
//! [`ProcessHandle`] backs a session without caring which backend produced
//! it, and delivers output through an injected [`OutputSink`] rather than
//! writing transport-specific code (Tauri events, JSON-RPC frames) inline.

use crate::session::SessionId;

/// Delivers terminal output and lifecycle notifications to subscribers.
/// The Client Fan-out Hub implements this by fanning out over active
/// WebSocket connections; implementations must be cheap to call from a
/// background reader thread.
pub trait OutputSink: Send + Sync + 'static {
    fn send_output(&self, session_id: &SessionId, data: &[u8]);
    fn send_exit(&self, session_id: &SessionId, exit_code: Option<i32>);
    fn send_error(&self, session_id: &SessionId, message: &str);
}

/// A running process backing a bridged session — either a local PTY or an
/// SSH shell channel. The bridge never matches on which backend it holds.
pub trait ProcessHandle: Send + Sync {
    fn write_input(&self, data: &[u8]) -> Result<(), crate::connection::ConnectionError>;
    fn resize(&self, cols: u16, rows: u16) -> Result<(), crate::connection::ConnectionError>;
    fn close(&self) -> Result<(), crate::connection::ConnectionError>;
    fn is_alive(&self) -> bool;
}
