//! SSH session lifecycle: handshake, auth, jump-host tunneling, shell/exec
//! (SPEC_FULL.md §4.2). Grounded on `backends/ssh/mod.rs`'s `Ssh::connect`
//! reader-thread pattern and `tunnel/local_forward.rs`'s
//! `channel_direct_tcpip` usage, generalized to build a jump-host hop
//! (an SSH session carried inside another session's tunneled channel)
//! instead of forwarding a local TCP listener.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::config::{HostConfig, JumpHostConfig};
use crate::connection::auth;
use crate::connection::traits::ProcessHandle;
use crate::connection::ConnectionError;

/// Output delivered from the reader thread; `None` signals clean EOF.
pub type OutputReceiver = tokio::sync::mpsc::Receiver<Vec<u8>>;

const OUTPUT_CHANNEL_CAPACITY: usize = 64;
const READ_BUF_SIZE: usize = 4096;

/// An authenticated SSH session, optionally tunneled through a jump host.
pub struct SshClient {
    session: Arc<ssh2::Session>,
}

impl SshClient {
    /// Handshake and authenticate directly against `hostname:port`.
    fn handshake_direct(hostname: &str, port: u16) -> Result<ssh2::Session, ConnectionError> {
        let addr = format!("{hostname}:{port}");
        let tcp = TcpStream::connect(&addr)
            .map_err(|e| ConnectionError::Unreachable(format!("connect to {addr} failed: {e}")))?;
        let mut session = ssh2::Session::new()
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| ConnectionError::Handshake(format!("handshake with {addr} failed: {e}")))?;
        Ok(session)
    }

    /// Handshake through an already-authenticated jump session's
    /// `channel_direct_tcpip` tunnel to `hostname:port`.
    fn handshake_via_jump(
        jump_session: &ssh2::Session,
        hostname: &str,
        port: u16,
    ) -> Result<ssh2::Session, ConnectionError> {
        let channel = jump_session
            .channel_direct_tcpip(hostname, port, None)
            .map_err(|e| ConnectionError::Unreachable(format!("tunnel to {hostname}:{port} failed: {e}")))?;
        let mut session = ssh2::Session::new()
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;
        session.set_tcp_stream(channel);
        session
            .handshake()
            .map_err(|e| ConnectionError::Handshake(format!("handshake via jump to {hostname}:{port} failed: {e}")))?;
        Ok(session)
    }

    fn connect_jump(jump: &JumpHostConfig) -> Result<ssh2::Session, ConnectionError> {
        info!(host = %jump.hostname, port = jump.port, user = %jump.username, "connecting jump host");
        let session = Self::handshake_direct(&jump.hostname, jump.port)?;
        let host_config = HostConfig {
            id: jump.id.clone(),
            name: jump.name.clone(),
            hostname: jump.hostname.clone(),
            port: jump.port,
            username: jump.username.clone(),
            private_key_path: jump.private_key_path.clone(),
            password: jump.password.clone(),
            password_env_var: jump.password_env_var.clone(),
            passphrase: jump.passphrase.clone(),
            passphrase_env_var: jump.passphrase_env_var.clone(),
            use_agent: jump.use_agent,
            jump_host: None,
        };
        let plan = auth::assemble(&host_config)?;
        auth::authenticate(&session, &jump.username, &plan)?;
        Ok(session)
    }

    /// Connect and authenticate against `host`, hopping through its
    /// configured jump host first if present. Intended for hosts where
    /// [`auth::requires_native_fallback`] returns `false` — callers must
    /// route the password-in-chain / jump+agent cases to the native `ssh`
    /// process fallback instead (SPEC_FULL.md §4.2, Open Question 2).
    pub fn connect(host: &HostConfig) -> Result<Self, ConnectionError> {
        info!(host = %host.hostname, port = host.port, user = %host.username, "connecting ssh host");

        let session = if let Some(jump) = &host.jump_host {
            let jump_session = Self::connect_jump(jump)?;
            Self::handshake_via_jump(&jump_session, &host.hostname, host.port)?
        } else {
            Self::handshake_direct(&host.hostname, host.port)?
        };

        let plan = auth::assemble(host)?;
        auth::authenticate(&session, &host.username, &plan)?;

        Ok(Self {
            session: Arc::new(session),
        })
    }

    /// Run a one-shot command to completion, returning `(exit_status,
    /// stdout, stderr)`. Used by the Multiplexer Adapter's command/parse
    /// round trip against remote hosts.
    pub fn exec(&self, command: &str) -> Result<(i32, String, String), ConnectionError> {
        self.session.set_blocking(true);
        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| ConnectionError::Io(format!("channel open failed: {e}")))?;
        channel
            .exec(command)
            .map_err(|e| ConnectionError::Io(format!("exec failed: {e}")))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        channel
            .read_to_string(&mut stdout)
            .map_err(|e| ConnectionError::Io(format!("stdout read failed: {e}")))?;
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .map_err(|e| ConnectionError::Io(format!("stderr read failed: {e}")))?;
        channel
            .wait_close()
            .map_err(|e| ConnectionError::Io(format!("channel close failed: {e}")))?;
        let exit_status = channel
            .exit_status()
            .map_err(|e| ConnectionError::Io(format!("exit status read failed: {e}")))?;

        Ok((exit_status, stdout, stderr))
    }

    /// Open an interactive PTY shell channel for terminal bridging
    /// (SPEC_FULL.md §4.5). Spawns a reader thread bridging the blocking
    /// `ssh2::Channel` to an async receiver.
    pub fn open_shell(&self, cols: u16, rows: u16) -> Result<(SshShellHandle, OutputReceiver), ConnectionError> {
        debug!("opening ssh shell channel");
        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| ConnectionError::Io(format!("channel open failed: {e}")))?;

        channel
            .request_pty("xterm-256color", None, Some((cols as u32, rows as u32, 0, 0)))
            .map_err(|e| ConnectionError::Io(format!("pty request failed: {e}")))?;
        channel
            .shell()
            .map_err(|e| ConnectionError::Io(format!("shell request failed: {e}")))?;

        self.session.set_blocking(false);

        let channel = Arc::new(Mutex::new(channel));
        let alive = Arc::new(AtomicBool::new(true));
        let (tx, rx) = tokio::sync::mpsc::channel(OUTPUT_CHANNEL_CAPACITY);

        let channel_clone = channel.clone();
        let alive_clone = alive.clone();
        std::thread::spawn(move || {
            let mut buf = [0u8; READ_BUF_SIZE];
            while alive_clone.load(Ordering::SeqCst) {
                let result = {
                    let mut ch = match channel_clone.lock() {
                        Ok(ch) => ch,
                        Err(_) => break,
                    };
                    ch.read(&mut buf)
                };
                match result {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(std::time::Duration::from_millis(10));
                    }
                    Err(_) => break,
                }
            }
            alive_clone.store(false, Ordering::SeqCst);
        });

        let handle = SshShellHandle {
            session: self.session.clone(),
            channel,
            alive,
        };
        Ok((handle, rx))
    }

    pub fn disconnect(&self) {
        self.session.set_blocking(true);
        let _ = self.session.disconnect(None, "closed by client", None);
    }
}

/// A [`ProcessHandle`] backed by an SSH PTY shell channel.
pub struct SshShellHandle {
    session: Arc<ssh2::Session>,
    channel: Arc<Mutex<ssh2::Channel>>,
    alive: Arc<AtomicBool>,
}

impl ProcessHandle for SshShellHandle {
    fn write_input(&self, data: &[u8]) -> Result<(), ConnectionError> {
        let mut channel = self
            .channel
            .lock()
            .map_err(|_| ConnectionError::Io("failed to lock ssh channel".into()))?;
        self.session.set_blocking(true);
        let result = channel.write_all(data);
        self.session.set_blocking(false);
        result.map_err(|e| ConnectionError::Io(format!("write failed: {e}")))
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), ConnectionError> {
        let mut channel = self
            .channel
            .lock()
            .map_err(|_| ConnectionError::Io("failed to lock ssh channel".into()))?;
        self.session.set_blocking(true);
        let result = channel.request_pty_size(cols as u32, rows as u32, None, None);
        self.session.set_blocking(false);
        result.map_err(|e| ConnectionError::Io(format!("pty resize failed: {e}")))
    }

    fn close(&self) -> Result<(), ConnectionError> {
        self.alive.store(false, Ordering::SeqCst);
        if let Ok(mut channel) = self.channel.lock() {
            self.session.set_blocking(true);
            let _ = channel.send_eof();
            let _ = channel.close();
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_to_unreachable_host_errors() {
        let host = HostConfig {
            id: "unreachable".into(),
            name: "Unreachable".into(),
            hostname: "127.0.0.1".into(),
            port: 1,
            username: "nobody".into(),
            private_key_path: None,
            password: Some("x".into()),
            password_env_var: None,
            passphrase: None,
            passphrase_env_var: None,
            use_agent: false,
            jump_host: None,
        };
        let result = SshClient::connect(&host);
        assert!(result.is_err());
    }
}
