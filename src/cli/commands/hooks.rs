//! `gt hooks sync`: push the base hook config into agent workspaces.

use clap::Subcommand;

use crate::Result;
use crate::config::load_rigs_config;
use crate::hooks::{SyncOutcome, load_base, sync_target};

#[derive(Subcommand, Debug)]
pub enum HooksCmd {
    /// Sync the town's base hooks into every rig's agent settings.
    Sync,
}

pub(crate) fn handle(cmd: HooksCmd) -> Result<()> {
    let town = super::super::require_town_root()?;
    match cmd {
        HooksCmd::Sync => {
            let base = load_base(&town)?;
            let rigs = load_rigs_config(&town)?;

            let mut targets = vec![town.join("crew").join(".claude").join("settings.json")];
            for rig_name in rigs.rigs.keys() {
                for workspace in ["crew", "polecats"] {
                    targets.push(
                        town.join(rig_name)
                            .join(workspace)
                            .join(".claude")
                            .join("settings.json"),
                    );
                }
            }

            for target in targets {
                let outcome = sync_target(&base, &target)?;
                let tag = match outcome {
                    SyncOutcome::Created => "created",
                    SyncOutcome::Updated => "updated",
                    SyncOutcome::Unchanged => "ok",
                };
                println!("  {tag:9} {}", target.display());
            }
            Ok(())
        }
    }
}
