//! CLI surface for Gas Town.
//!
//! Command tree plus thin handlers; all real work lives in the library
//! modules. Exit codes: 0 success, non-zero failure with the error printed
//! to stderr by `main`.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::Result;
use crate::config::ConfigError;

pub mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "gt",
    version,
    about = "Gas Town multi-agent workload orchestrator",
    infer_subcommands = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Debug output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start Gas Town: launch the Mayor and Deacon.
    Start,

    /// Shutdown Gas Town agents.
    Shutdown(commands::shutdown::ShutdownArgs),

    /// Dispatch a bead to a rig.
    Sling(commands::sling::SlingArgs),

    /// Rig availability controls.
    #[command(subcommand)]
    Rig(commands::rig::RigCmd),

    /// Supervisor daemon controls.
    #[command(subcommand)]
    Daemon(commands::daemon::DaemonCmd),

    /// Store server controls.
    #[command(subcommand)]
    Dolt(commands::dolt::DoltCmd),

    /// Compact databases over the commit threshold.
    Maintain(commands::maintain::MaintainArgs),

    /// Convoy management.
    #[command(subcommand)]
    Convoy(commands::convoy::ConvoyCmd),

    /// Agent hook configuration sync.
    #[command(subcommand)]
    Hooks(commands::hooks::HooksCmd),
}

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

/// `gt daemon run` installs its own telemetry (with the rolling file layer);
/// main must not claim the global subscriber first.
pub fn is_daemon_run(cli: &Cli) -> bool {
    matches!(cli.command, Commands::Daemon(commands::daemon::DaemonCmd::Run))
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Start => commands::start::handle(),
        Commands::Shutdown(args) => commands::shutdown::handle(args),
        Commands::Sling(args) => commands::sling::handle(args),
        Commands::Rig(cmd) => commands::rig::handle(cmd),
        Commands::Daemon(cmd) => commands::daemon::handle(cmd, cli.verbose),
        Commands::Dolt(cmd) => commands::dolt::handle(cmd),
        Commands::Maintain(args) => commands::maintain::handle(args),
        Commands::Convoy(cmd) => commands::convoy::handle(cmd),
        Commands::Hooks(cmd) => commands::hooks::handle(cmd),
    }
}

/// Resolve the town root or fail with remediation.
pub(crate) fn require_town_root() -> Result<PathBuf> {
    crate::paths::find_town_root().ok_or_else(|| ConfigError::NotInTown.into())
}
