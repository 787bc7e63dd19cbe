//! `gt start`: bring up the Mayor and Deacon sessions.
//!
//! Witnesses, refineries and polecats start lazily; the supervisor daemon
//! (`gt daemon run`) respawns whatever dies.

use crate::Result;
use crate::session::{AgentRole, agent_env};
use crate::tmux::{SessionDriver, Tmux};

pub(crate) fn handle() -> Result<()> {
    let town = super::super::require_town_root()?;
    let tmux = Tmux::new();

    println!("Starting Gas Town from {}\n", town.display());

    // Mayor first so the Deacon sees it as up.
    for (session, role) in [("gt-mayor", AgentRole::Mayor), ("gt-deacon", AgentRole::Deacon)] {
        if tmux.has_session(session)? {
            println!("  o {session} already running");
            continue;
        }
        let env = agent_env(role, "", "", &town);
        let env_args: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let cmd = format!("exec env {} claude", env_args.join(" "));
        tmux.new_session_with_command(session, &town.display().to_string(), &cmd)?;
        println!("  + {session} started");
    }

    println!("\nGas Town is running");
    println!("  Check status:  gt daemon status");
    println!("  Shut down:     gt shutdown");
    Ok(())
}
