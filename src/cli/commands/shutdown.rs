//! `gt shutdown`: stop agents, preserving crew sessions by default.

use std::io::BufRead;
use std::time::Duration;

use clap::Args;

use crate::Result;
use crate::daemon::{
    ShutdownMode, categorize_sessions, kill_sessions_in_order, run_graceful_shutdown,
};
use crate::tmux::{SessionDriver, Tmux};

#[derive(Args, Debug)]
pub struct ShutdownArgs {
    /// Also stop crew sessions (by default, crew is preserved).
    #[arg(short, long)]
    pub all: bool,

    /// Only stop polecats (minimal shutdown).
    #[arg(long, conflicts_with = "all")]
    pub polecats_only: bool,

    /// Send ESC to agents and wait for handoff before killing.
    #[arg(short, long)]
    pub graceful: bool,

    /// Seconds to wait for graceful shutdown.
    #[arg(short, long, default_value_t = 30)]
    pub wait: u64,

    /// Skip the confirmation prompt.
    #[arg(short, long)]
    pub yes: bool,
}

pub(crate) fn handle(args: ShutdownArgs) -> Result<()> {
    let tmux = Tmux::new();
    let sessions = tmux.list_sessions()?;

    let mode = if args.polecats_only {
        ShutdownMode::PolecatsOnly
    } else if args.all {
        ShutdownMode::All
    } else {
        ShutdownMode::Default
    };
    let (to_stop, preserved) = categorize_sessions(&sessions, mode);

    if to_stop.is_empty() {
        println!("Gas Town was not running");
        return Ok(());
    }

    println!("Sessions to stop:");
    for session in &to_stop {
        println!("  - {session}");
    }
    if !preserved.is_empty() && !args.all {
        println!("Sessions preserved (crew):");
        for session in &preserved {
            println!("  o {session}");
        }
    }

    if !args.yes && !confirm("Proceed with shutdown? [y/N] ") {
        println!("Shutdown cancelled.");
        return Ok(());
    }

    let stopped = if args.graceful {
        println!("Graceful shutdown (waiting up to {}s)...", args.wait);
        run_graceful_shutdown(&tmux, &to_stop, Duration::from_secs(args.wait))
    } else {
        kill_sessions_in_order(&tmux, &to_stop)
    };

    println!("Shutdown complete ({stopped} sessions stopped)");
    Ok(())
}

fn confirm(prompt: &str) -> bool {
    use std::io::Write;
    print!("{prompt}");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}
