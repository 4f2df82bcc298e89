//! Error kinds for the aggregator engine.
//!
//! Mirrors the taxonomy in SPEC_FULL.md §7: configuration errors prevent
//! boot, host-connectivity errors drive the reconnect loop, persistence
//! errors are logged and fall back to defaults, bridge failures are
//! contained to the affected session.

use thiserror::Error;

/// Top-level error for engine-wide operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Connection(#[from] crate::connection::ConnectionError),

    #[error(transparent)]
    Persistence(#[from] crate::persistence::PersistenceError),

    #[error(transparent)]
    Bridge(#[from] crate::bridge::BridgeError),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_message() {
        let e = CoreError::Config("port must be 1..65535".into());
        assert_eq!(e.to_string(), "configuration error: port must be 1..65535");
    }

    #[test]
    fn session_not_found_message() {
        let e = CoreError::SessionNotFound("local:$0:%3".into());
        assert_eq!(e.to_string(), "session not found: local:$0:%3");
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let e: CoreError = io.into();
        assert!(matches!(e, CoreError::Io(_)));
    }
}
