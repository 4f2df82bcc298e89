//! Local PTY spawning for the `local` pseudo-host (SPEC_FULL.md §4.2).
//!
//! Grounded on `terminal/local_shell.rs`'s `LocalShell`: `portable-pty`
//! allocates a PTY, a reader thread bridges the blocking master into an
//! async channel, and writes/resizes go straight through the master.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};

use crate::connection::traits::ProcessHandle;
use crate::connection::ConnectionError;

pub type OutputReceiver = tokio::sync::mpsc::Receiver<Vec<u8>>;

/// Detect the user's default shell. Unix-only: reads `$SHELL`, falling
/// back to `/bin/sh` when unset.
pub fn default_shell_program() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

pub fn open_shell(cols: u16, rows: u16, working_dir: Option<&str>) -> Result<(LocalPtyHandle, OutputReceiver), ConnectionError> {
    let pty_system = native_pty_system();
    let pty_pair = pty_system
        .openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| ConnectionError::Io(format!("pty allocation failed: {e}")))?;

    let mut command = CommandBuilder::new(default_shell_program());
    command.env("TERM", "xterm-256color");
    command.env("COLORTERM", "truecolor");
    if let Some(dir) = working_dir {
        command.cwd(dir);
    }

    let child = pty_pair
        .slave
        .spawn_command(command)
        .map_err(|e| ConnectionError::Io(format!("shell spawn failed: {e}")))?;
    drop(pty_pair.slave);

    let writer = pty_pair
        .master
        .take_writer()
        .map_err(|e| ConnectionError::Io(format!("pty writer unavailable: {e}")))?;
    let mut reader = pty_pair
        .master
        .try_clone_reader()
        .map_err(|e| ConnectionError::Io(format!("pty reader unavailable: {e}")))?;

    let alive = Arc::new(AtomicBool::new(true));
    let (tx, rx) = tokio::sync::mpsc::channel(64);

    let alive_clone = alive.clone();
    std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        alive_clone.store(false, Ordering::SeqCst);
    });

    let handle = LocalPtyHandle {
        master: Arc::new(Mutex::new(pty_pair.master)),
        writer: Arc::new(Mutex::new(writer)),
        alive,
        child: Arc::new(Mutex::new(child)),
    };
    Ok((handle, rx))
}

pub struct LocalPtyHandle {
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    alive: Arc<AtomicBool>,
    child: Arc<Mutex<Box<dyn portable_pty::Child + Send>>>,
}

impl ProcessHandle for LocalPtyHandle {
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
    fn default_shell_falls_back_to_sh_when_unset() {
        let orig = std::env::var("SHELL").ok();
        std::env::remove_var("SHELL");
        assert_eq!(default_shell_program(), "/bin/sh");
        if let Some(val) = orig {
            std::env::set_var("SHELL", val);
        }
    }
}
