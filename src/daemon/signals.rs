//! Daemon signal repertoire.
//!
//! Unix: SIGINT/SIGTERM shut down, SIGUSR1 reloads patrol config and
//! restart-tracker state, SIGUSR2 additionally re-reads the agent roster.
//! Windows has no user signals; lifecycle operations report unsupported.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use super::DaemonError;

/// Flags flipped by the installed signal handlers; the supervisor loop polls
/// them every tick.
#[derive(Debug, Clone, Default)]
pub struct SignalFlags {
    pub shutdown: Arc<AtomicBool>,
    pub reload: Arc<AtomicBool>,
    pub reload_restart: Arc<AtomicBool>,
}

impl SignalFlags {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Install handlers for the daemon's fixed signal set.
///
/// Failing to install a handler is fatal: a daemon that cannot be shut down
/// cleanly must not start.
#[cfg(unix)]
pub fn install(flags: &SignalFlags) -> Result<(), DaemonError> {
    use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1, SIGUSR2};

    let register = |sig, flag: &Arc<AtomicBool>| {
        signal_hook::flag::register(sig, Arc::clone(flag)).map(|_| ())
    };
    register(SIGINT, &flags.shutdown)
        .and_then(|()| register(SIGTERM, &flags.shutdown))
        .and_then(|()| register(SIGUSR1, &flags.reload))
        .and_then(|()| register(SIGUSR2, &flags.reload_restart))
        .map_err(|e| DaemonError::SignalInstall(e.to_string()))
}

#[cfg(windows)]
pub fn install(flags: &SignalFlags) -> Result<(), DaemonError> {
    use signal_hook::consts::{SIGINT, SIGTERM};

    signal_hook::flag::register(SIGINT, Arc::clone(&flags.shutdown))
        .and_then(|_| signal_hook::flag::register(SIGTERM, Arc::clone(&flags.shutdown)))
        .map(|_| ())
        .map_err(|e| DaemonError::SignalInstall(e.to_string()))
}

/// Ask a running daemon to reload config and roster.
#[cfg(unix)]
pub fn signal_daemon_reload(pid: u32) -> Result<(), DaemonError> {
    let status = std::process::Command::new("kill")
        .arg("-USR2")
        .arg(pid.to_string())
        .status()
        .map_err(|e| DaemonError::SignalInstall(e.to_string()))?;
    if status.success() {
        Ok(())
    } else {
        Err(DaemonError::SignalInstall(format!(
            "kill -USR2 {pid} exited {status}"
        )))
    }
}

#[cfg(windows)]
pub fn signal_daemon_reload(_pid: u32) -> Result<(), DaemonError> {
    Err(DaemonError::Unsupported(
        "daemon reload signal is not supported on Windows".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn install_succeeds_and_flags_start_clear() {
        let flags = SignalFlags::new();
        install(&flags).expect("install");
        assert!(!flags.shutdown.load(Ordering::Relaxed));
        assert!(!flags.reload.load(Ordering::Relaxed));
        assert!(!flags.reload_restart.load(Ordering::Relaxed));
    }
}
