//! Terminal-multiplexer driver.
//!
//! All agent sessions share one multiplexer socket, the literal `"default"`.
//! Per-town sockets were tried and removed: they split session visibility
//! across sockets without providing real isolation.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::Transience;

/// Payloads beyond this are sent in chunks to avoid overflowing the
/// multiplexer's argument handling.
const SEND_CHUNK_SIZE: usize = 500;

/// How long a freshly-created session may keep showing a bare shell before
/// the create is declared failed.
const CREATE_HEALTH_TIMEOUT: Duration = Duration::from_millis(500);

static DEFAULT_SOCKET: OnceLock<Mutex<String>> = OnceLock::new();

fn socket_cell() -> &'static Mutex<String> {
    DEFAULT_SOCKET.get_or_init(|| Mutex::new("default".to_string()))
}

/// The process-wide default socket name. The only sanctioned singleton.
pub fn get_default_socket() -> String {
    socket_cell().lock().expect("socket lock poisoned").clone()
}

/// Override the default socket. Tests must restore the previous value.
pub fn set_default_socket(name: &str) {
    let mut cell = socket_cell().lock().expect("socket lock poisoned");
    *cell = if name.is_empty() {
        "default".to_string()
    } else {
        name.to_string()
    };
}

#[derive(Debug, Error)]
pub enum TmuxError {
    #[error("failed to launch tmux: {0}")]
    Launch(#[from] std::io::Error),

    #[error("tmux {verb} failed: {stderr}")]
    CommandFailed { verb: String, stderr: String },

    #[error("session {0} already exists")]
    SessionExists(String),

    #[error("working directory does not exist: {0}")]
    WorkDirMissing(PathBuf),

    #[error("session {session} failed health check: pane still running {command}")]
    SessionUnhealthy { session: String, command: String },
}

impl TmuxError {
    pub fn transience(&self) -> Transience {
        match self {
            TmuxError::Launch(_) | TmuxError::CommandFailed { .. } => Transience::Retryable,
            TmuxError::SessionExists(_) | TmuxError::WorkDirMissing(_) => Transience::Permanent,
            TmuxError::SessionUnhealthy { .. } => Transience::Unknown,
        }
    }
}

/// Capability set the daemon and dispatcher need from the multiplexer.
pub trait SessionDriver: Send + Sync {
    fn list_sessions(&self) -> Result<Vec<String>, TmuxError>;
    fn has_session(&self, name: &str) -> Result<bool, TmuxError>;
    fn new_session_with_command(
        &self,
        name: &str,
        work_dir: &str,
        cmd: &str,
    ) -> Result<(), TmuxError>;
    fn kill_session(&self, name: &str) -> Result<(), TmuxError>;
    fn kill_session_with_processes(&self, name: &str) -> Result<(), TmuxError>;
    fn send_keys(&self, name: &str, message: &str) -> Result<(), TmuxError>;
    fn send_keys_raw(&self, name: &str, key: &str) -> Result<(), TmuxError>;
    fn capture_pane(&self, name: &str, lines: u32) -> Result<String, TmuxError>;
    fn get_pane_command(&self, name: &str) -> Result<String, TmuxError>;
    fn get_all_environment(&self, name: &str) -> Result<Vec<(String, String)>, TmuxError>;
    fn set_environment(&self, name: &str, key: &str, value: &str) -> Result<(), TmuxError>;
    fn get_global_environment(&self, key: &str) -> Result<Option<String>, TmuxError>;
    fn set_global_environment(&self, key: &str, value: &str) -> Result<(), TmuxError>;
}

/// The real driver over the `tmux` binary.
#[derive(Debug, Clone)]
pub struct Tmux {
    socket: String,
}

impl Tmux {
    pub fn new() -> Self {
        Self {
            socket: get_default_socket(),
        }
    }

    pub fn with_socket(socket: &str) -> Self {
        Self {
            socket: socket.to_string(),
        }
    }

    fn run(&self, verb: &str, args: &[&str]) -> Result<String, TmuxError> {
        let output = Command::new("tmux")
            .arg("-L")
            .arg(&self.socket)
            .args(args)
            .output()?;
        if !output.status.success() {
            return Err(TmuxError::CommandFailed {
                verb: verb.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Poll the pane until its command leaves the shell set, or time out.
    pub fn wait_for_command(
        &self,
        session: &str,
        shells: &[&str],
        timeout: Duration,
    ) -> Result<String, TmuxError> {
        let deadline = Instant::now() + timeout;
        let mut last = String::new();
        loop {
            last = self.get_pane_command(session)?;
            if !shells.contains(&last.as_str()) {
                return Ok(last);
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        Err(TmuxError::SessionUnhealthy {
            session: session.to_string(),
            command: last,
        })
    }
}

impl Default for Tmux {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionDriver for Tmux {
    fn list_sessions(&self) -> Result<Vec<String>, TmuxError> {
        match self.run("list-sessions", &["list-sessions", "-F", "#{session_name}"]) {
            Ok(out) => Ok(out.lines().map(str::to_string).collect()),
            // No server yet means no sessions, not an error.
            Err(TmuxError::CommandFailed { stderr, .. })
                if stderr.contains("no server running") || stderr.contains("No such file") =>
            {
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    fn has_session(&self, name: &str) -> Result<bool, TmuxError> {
        match self.run("has-session", &["has-session", "-t", name]) {
            Ok(_) => Ok(true),
            Err(TmuxError::CommandFailed { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn new_session_with_command(
        &self,
        name: &str,
        work_dir: &str,
        cmd: &str,
    ) -> Result<(), TmuxError> {
        if !work_dir.is_empty() && !Path::new(work_dir).is_dir() {
            return Err(TmuxError::WorkDirMissing(PathBuf::from(work_dir)));
        }
        if self.has_session(name)? {
            return Err(TmuxError::SessionExists(name.to_string()));
        }

        // Two-step create: open the session with a placeholder shell, then
        // respawn the pane into the real command. A one-step create with the
        // command inline leaves a blank dead window when the binary is bad.
        let mut create: Vec<&str> = vec!["new-session", "-d", "-s", name];
        if !work_dir.is_empty() {
            create.push("-c");
            create.push(work_dir);
        }
        self.run("new-session", &create)?;

        if let Err(err) = self.run("respawn-pane", &["respawn-pane", "-k", "-t", name, cmd]) {
            let _ = self.kill_session(name);
            return Err(err);
        }

        // The agent command exec-replaces the shell; if the pane still shows
        // a shell after the grace period, the command never started.
        match self.wait_for_command(name, &["sh", "bash", "zsh"], CREATE_HEALTH_TIMEOUT) {
            Ok(_) => Ok(()),
            Err(err) => {
                let _ = self.kill_session(name);
                Err(err)
            }
        }
    }

    fn kill_session(&self, name: &str) -> Result<(), TmuxError> {
        self.run("kill-session", &["kill-session", "-t", name])?;
        Ok(())
    }

    fn kill_session_with_processes(&self, name: &str) -> Result<(), TmuxError> {
        // Kill the pane process tree first, then the session.
        if let Ok(out) = self.run(
            "list-panes",
            &["list-panes", "-t", name, "-F", "#{pane_pid}"],
        ) {
            for pid in out.lines().filter_map(|l| l.trim().parse::<u32>().ok()) {
                let _ = Command::new("kill").arg(pid.to_string()).status();
            }
        }
        self.kill_session(name)
    }

    fn send_keys(&self, name: &str, message: &str) -> Result<(), TmuxError> {
        let sanitized = sanitize_nudge_message(message);
        for chunk in chunk_message(&sanitized, SEND_CHUNK_SIZE) {
            self.run("send-keys", &["send-keys", "-t", name, "-l", chunk])?;
        }
        self.run("send-keys", &["send-keys", "-t", name, "Enter"])?;
        Ok(())
    }

    fn send_keys_raw(&self, name: &str, key: &str) -> Result<(), TmuxError> {
        self.run("send-keys", &["send-keys", "-t", name, key])?;
        Ok(())
    }

    fn capture_pane(&self, name: &str, lines: u32) -> Result<String, TmuxError> {
        let start = format!("-{lines}");
        self.run(
            "capture-pane",
            &["capture-pane", "-p", "-t", name, "-S", &start],
        )
    }

    fn get_pane_command(&self, name: &str) -> Result<String, TmuxError> {
        let out = self.run(
            "display-message",
            &[
                "display-message",
                "-p",
                "-t",
                name,
                "#{pane_current_command}",
            ],
        )?;
        Ok(out.trim().to_string())
    }

    fn get_all_environment(&self, name: &str) -> Result<Vec<(String, String)>, TmuxError> {
        let out = self.run("show-environment", &["show-environment", "-t", name])?;
        Ok(out
            .lines()
            .filter(|l| !l.starts_with('-'))
            .filter_map(|l| {
                l.split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect())
    }

    fn set_environment(&self, name: &str, key: &str, value: &str) -> Result<(), TmuxError> {
        self.run(
            "set-environment",
            &["set-environment", "-t", name, key, value],
        )?;
        Ok(())
    }

    fn get_global_environment(&self, key: &str) -> Result<Option<String>, TmuxError> {
        let out = match self.run("show-environment", &["show-environment", "-g", key]) {
            Ok(out) => out,
            Err(TmuxError::CommandFailed { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };
        Ok(out
            .lines()
            .next()
            .and_then(|l| l.split_once('='))
            .map(|(_, v)| v.to_string()))
    }

    fn set_global_environment(&self, key: &str, value: &str) -> Result<(), TmuxError> {
        self.run(
            "set-environment",
            &["set-environment", "-g", key, value],
        )?;
        Ok(())
    }
}

/// Strip control sequences that would corrupt the receiving pane.
///
/// ESC, CR and BS are dropped; TAB becomes a space (it would trigger shell
/// completion); newlines and Unicode pass through.
pub fn sanitize_nudge_message(message: &str) -> String {
    message
        .chars()
        .filter_map(|c| match c {
            '\x1b' | '\r' | '\x08' => None,
            '\t' => Some(' '),
            other => Some(other),
        })
        .collect()
}

/// Split a message into chunks of at most `size` bytes on char boundaries.
pub fn chunk_message(message: &str, size: usize) -> Vec<&str> {
    if message.is_empty() {
        return Vec::new();
    }
    let mut chunks = Vec::new();
    let mut rest = message;
    while rest.len() > size {
        let mut cut = size;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        chunks.push(head);
        rest = tail;
    }
    chunks.push(rest);
    chunks
}
