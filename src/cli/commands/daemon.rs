//! `gt daemon`: supervisor lifecycle and maintenance hooks.

use clap::Subcommand;

use crate::Result;
use crate::daemon::{
    Daemon, DaemonConfig, DaemonError, clear_agent_backoff, signal_daemon_reload,
    verify_pid_ownership,
};

#[derive(Subcommand, Debug)]
pub enum DaemonCmd {
    /// Run the supervisor in the foreground.
    Run,
    /// Show supervisor status.
    Status,
    /// Ask a running supervisor to reload config and roster.
    Reload,
    /// Clear crash-loop/backoff state for an agent.
    ClearBackoff { agent: String },
}

pub(crate) fn handle(cmd: DaemonCmd, verbose: u8) -> Result<()> {
    let town = super::super::require_town_root()?;
    match cmd {
        DaemonCmd::Run => {
            let _guard =
                crate::telemetry::init_daemon(verbose.max(1), &crate::paths::daemon_log_dir(&town));
            let daemon = Daemon::new(DaemonConfig::new(&town))?;
            daemon.run()?;
            Ok(())
        }
        DaemonCmd::Status => {
            let pid_path = crate::paths::daemon_pid_path(&town);
            match verify_pid_ownership(&pid_path).map_err(DaemonError::Io)? {
                Some(owned) if owned.alive => {
                    println!("Supervisor running (pid {})", owned.pid);
                    if owned.nonce.is_empty() {
                        println!("  note: legacy PID file, no reuse protection");
                    }
                }
                Some(owned) => {
                    println!("Supervisor not running (stale PID file, pid {})", owned.pid);
                }
                None => println!("Supervisor not running"),
            }
            Ok(())
        }
        DaemonCmd::Reload => {
            let pid_path = crate::paths::daemon_pid_path(&town);
            let Some(owned) = verify_pid_ownership(&pid_path).map_err(DaemonError::Io)? else {
                return Err(DaemonError::Unsupported(
                    "supervisor is not running".to_string(),
                )
                .into());
            };
            if !owned.alive {
                return Err(DaemonError::Unsupported(
                    "supervisor PID file is stale".to_string(),
                )
                .into());
            }
            signal_daemon_reload(owned.pid)?;
            println!("Reload signal sent to pid {}", owned.pid);
            Ok(())
        }
        DaemonCmd::ClearBackoff { agent } => {
            clear_agent_backoff(&town, &agent).map_err(DaemonError::Io)?;
            println!("Cleared backoff for {agent}");
            Ok(())
        }
    }
}
