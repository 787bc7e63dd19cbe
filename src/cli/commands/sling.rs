//! `gt sling <bead> <rig>`: dispatch a bead to a rig.

use clap::Args;

use crate::Result;
use crate::beads::Beads;
use crate::session::init_registry;
use crate::sling::{SlingOptions, SlingParams, execute_sling};
use crate::tmux::Tmux;

#[derive(Args, Debug)]
pub struct SlingArgs {
    /// Bead to dispatch.
    pub bead_id: String,

    /// Target rig.
    pub rig: String,

    /// Formula the worker should run.
    #[arg(long, default_value = "")]
    pub formula: String,

    /// Merge strategy: direct, mr, or local.
    #[arg(long, default_value = "")]
    pub merge: String,

    /// Mark the convoy owner-managed (skips the merge pipeline).
    #[arg(long)]
    pub owned: bool,

    /// Do not create an auto-convoy for untracked beads.
    #[arg(long)]
    pub no_convoy: bool,

    /// Agent binary to exec in the session.
    #[arg(long, default_value = "")]
    pub agent: String,
}

pub(crate) fn handle(args: SlingArgs) -> Result<()> {
    let town = super::super::require_town_root()?;
    let registry = init_registry(&town).map_err(crate::daemon::DaemonError::Io)?;

    // Convoy writes must survive even when a surrounding process disabled
    // auto-commit globally.
    let beads = Beads::new(crate::paths::town_beads_dir(&town)).with_auto_commit();
    let driver = Tmux::new();

    let params = SlingParams {
        bead_id: args.bead_id.clone(),
        rig_name: args.rig.clone(),
        town_root: town,
    };
    let opts = SlingOptions {
        create_convoy: !args.no_convoy,
        owned: args.owned,
        merge_strategy: args.merge,
        formula: args.formula,
        agent: args.agent,
    };

    let (result, err) = execute_sling(&params, &opts, &beads, &driver, &registry);
    if let Some(err) = err {
        return Err(err.into());
    }

    println!("Slung {} to {}", result.bead_id, result.rig);
    if !result.convoy_id.is_empty() {
        println!("  convoy:  {}", result.convoy_id);
    }
    println!("  session: {}", result.session);
    Ok(())
}
