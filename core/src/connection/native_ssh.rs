//! Native `ssh` process fallback (SPEC_FULL.md §4.2, Open Question 2).
//!
//! `ssh2`/libssh2 cannot prompt for passwords mid-handshake the way an
//! interactive terminal does, and does not forward agent sockets across a
//! jump hop. For the host/auth combinations where this matters — a
//! password anywhere in the connection chain, or a jump host paired with
//! agent auth — a real `ssh` binary is spawned under a PTY instead, and
//! its output is watched for a password prompt the way a human would read
//! one. Grounded on `terminal/local_shell.rs`'s portable-pty spawn pattern
//! generalized from a shell to the `ssh` command line.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, warn};

use crate::config::HostConfig;
use crate::connection::auth::{resolve_jump_password, resolve_password};
use crate::connection::traits::ProcessHandle;
use crate::connection::ConnectionError;

/// Debounce interval between consecutive password-prompt writes: a
/// single prompt can appear fragmented across several PTY reads, and
/// re-sending the password on every fragment would desync the remote
/// `ssh` client's line editor.
const PROMPT_WRITE_DEBOUNCE: Duration = Duration::from_millis(500);

const PASSWORD_PROMPT_MARKERS: &[&str] = &["assword:", "Password:"];

pub type OutputReceiver = tokio::sync::mpsc::Receiver<Vec<u8>>;

fn build_ssh_args(host: &HostConfig) -> Vec<String> {
    let mut args = vec![
        "-tt".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        "UserKnownHostsFile=/dev/null".to_string(),
        "-o".to_string(),
        "BatchMode=no".to_string(),
        "-p".to_string(),
        host.port.to_string(),
    ];
    if let Some(jump) = &host.jump_host {
        args.push("-J".to_string());
        args.push(format!("{}@{}:{}", jump.username, jump.hostname, jump.port));
    }
    if let Some(key_path) = &host.private_key_path {
        args.push("-i".to_string());
        args.push(key_path.clone());
    }
    args.push(format!("{}@{}", host.username, host.hostname));
    args
}

/// Spawn `ssh` under a PTY, authenticate by watching for a password
/// prompt (when the chain requires one), and return a [`ProcessHandle`]
/// plus its output stream — the same shape [`super::ssh_client::SshClient::open_shell`]
/// returns, so the Terminal Bridge is agnostic to which path produced it.
pub fn open_shell(host: &HostConfig) -> Result<(NativeSshHandle, OutputReceiver), ConnectionError> {
    let pty_system = native_pty_system();
    let pty_pair = pty_system
        .openpty(PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| ConnectionError::Io(format!("pty allocation failed: {e}")))?;

    let mut command = CommandBuilder::new("ssh");
    for arg in build_ssh_args(host) {
        command.arg(arg);
    }
    command.env("TERM", "xterm-256color");

    let child = pty_pair
        .slave
        .spawn_command(command)
        .map_err(|e| ConnectionError::Io(format!("ssh spawn failed: {e}")))?;
    drop(pty_pair.slave);

    let writer = pty_pair
        .master
        .take_writer()
        .map_err(|e| ConnectionError::Io(format!("pty writer unavailable: {e}")))?;
    let mut reader = pty_pair
        .master
        .try_clone_reader()
        .map_err(|e| ConnectionError::Io(format!("pty reader unavailable: {e}")))?;

    // A jump+target chain prompts for the jump host's password first (the
    // `-J` hop authenticates before the target connection is even
    // attempted), then the target host's — queue them in that order so
    // each debounced prompt consumes the next one instead of resending a
    // single fixed value.
    let mut passwords: VecDeque<String> = VecDeque::new();
    if let Some(jump) = &host.jump_host {
        if let Some(jump_password) = resolve_jump_password(jump) {
            passwords.push_back(jump_password);
        }
    }
    if let Some(password) = resolve_password(host) {
        passwords.push_back(password);
    }

    let alive = Arc::new(AtomicBool::new(true));
    let (tx, rx) = tokio::sync::mpsc::channel(64);

    let writer = Arc::new(Mutex::new(writer));
    let writer_clone = writer.clone();
    let alive_clone = alive.clone();
    std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        let mut last_prompt_write: Option<Instant> = None;
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = &buf[..n];
                    if looks_like_password_prompt(chunk) {
                        let debounced = last_prompt_write
                            .is_some_and(|t| t.elapsed() < PROMPT_WRITE_DEBOUNCE);
                        if !debounced {
                            if let Some(password) = passwords.pop_front() {
                                debug!("password prompt detected on native ssh PTY");
                                if let Ok(mut w) = writer_clone.lock() {
                                    let _ = w.write_all(password.as_bytes());
                                    let _ = w.write_all(b"\n");
                                    let _ = w.flush();
                                }
                            }
                            last_prompt_write = Some(Instant::now());
                        }
                    }
                    if tx.blocking_send(chunk.to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        alive_clone.store(false, Ordering::SeqCst);
    });

    let handle = NativeSshHandle {
        master: Arc::new(Mutex::new(pty_pair.master)),
        writer,
        alive,
        child: Arc::new(Mutex::new(child)),
    };
    Ok((handle, rx))
}

fn looks_like_password_prompt(chunk: &[u8]) -> bool {
    let text = String::from_utf8_lossy(chunk);
    PASSWORD_PROMPT_MARKERS.iter().any(|marker| text.contains(marker))
}

pub struct NativeSshHandle {
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    alive: Arc<AtomicBool>,
    child: Arc<Mutex<Box<dyn portable_pty::Child + Send>>>,
}

impl ProcessHandle for NativeSshHandle {
    fn write_input(&self, data: &[u8]) -> Result<(), ConnectionError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| ConnectionError::Io("failed to lock pty writer".into()))?;
        writer
            .write_all(data)
            .map_err(|e| ConnectionError::Io(format!("write failed: {e}")))?;
        writer
            .flush()
            .map_err(|e| ConnectionError::Io(format!("flush failed: {e}")))
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), ConnectionError> {
        let master = self
            .master
            .lock()
            .map_err(|_| ConnectionError::Io("failed to lock pty master".into()))?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ConnectionError::Io(format!("resize failed: {e}")))
    }

    fn close(&self) -> Result<(), ConnectionError> {
        self.alive.store(false, Ordering::SeqCst);
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        if !self.alive.load(Ordering::SeqCst) {
            return false;
        }
        self.child
            .lock()
            .ok()
            .and_then(|mut c| c.try_wait().ok())
            .map(|status| status.is_none())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_lowercase_password_marker() {
        assert!(looks_like_password_prompt(b"deploy@example.com's password: "));
    }

    #[test]
    fn detects_capitalized_password_marker() {
        assert!(looks_like_password_prompt(b"Password: "));
    }

    #[test]
    fn ordinary_output_is_not_a_prompt() {
        assert!(!looks_like_password_prompt(b"Welcome to Ubuntu 22.04\n"));
    }

    #[test]
    fn ssh_args_include_jump_host_flag() {
        let host = HostConfig {
            id: "h1".into(),
            name: "Host".into(),
            hostname: "example.com".into(),
            port: 2222,
            username: "deploy".into(),
            private_key_path: None,
            password: Some("x".into()),
            password_env_var: None,
            passphrase: None,
            passphrase_env_var: None,
            use_agent: false,
            jump_host: Some(Box::new(crate::config::JumpHostConfig {
                id: "bastion".into(),
                name: "Bastion".into(),
                hostname: "bastion.example.com".into(),
                port: 22,
                username: "jump".into(),
                private_key_path: None,
                password: None,
                password_env_var: None,
                passphrase: None,
                passphrase_env_var: None,
                use_agent: true,
            })),
        };
        let args = build_ssh_args(&host);
        assert!(args.contains(&"-J".to_string()));
        assert!(args.iter().any(|a| a == "jump@bastion.example.com:22"));
        assert!(args.iter().any(|a| a == "deploy@example.com"));
    }
}
