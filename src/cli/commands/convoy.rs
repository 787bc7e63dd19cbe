//! `gt convoy`: create, close, and re-status tracking convoys.

use clap::Subcommand;

use crate::Result;
use crate::beads::{Beads, BeadsApi, UpdateOptions};
use crate::convoy::{
    ConvoyError, conflict_report, create_auto_convoy, create_batch_convoy,
    ensure_known_convoy_status, is_tracked_by_convoy, validate_convoy_status_transition,
};

#[derive(Subcommand, Debug)]
pub enum ConvoyCmd {
    /// Create a convoy tracking one or more beads.
    Create {
        /// Beads to track.
        #[arg(required = true)]
        beads: Vec<String>,
        /// Target rig, used in the batch convoy title.
        #[arg(long, default_value = "")]
        rig: String,
        /// Mark the convoy owner-managed.
        #[arg(long)]
        owned: bool,
        /// Merge strategy: direct, mr, or local.
        #[arg(long, default_value = "")]
        merge: String,
    },
    /// Close a convoy.
    Close {
        convoy_id: String,
        /// Reason recorded on the close.
        #[arg(short, long, default_value = "closed via gt convoy")]
        reason: String,
    },
    /// Change a convoy's status (validated against the transition table).
    Status { convoy_id: String, status: String },
}

pub(crate) fn handle(cmd: ConvoyCmd) -> Result<()> {
    let town = super::super::require_town_root()?;
    let beads = Beads::new(crate::paths::town_beads_dir(&town)).with_auto_commit();

    match cmd {
        ConvoyCmd::Create {
            beads: bead_ids,
            rig,
            owned,
            merge,
        } => {
            // A bead may belong to at most one open convoy.
            for bead in &bead_ids {
                if let Some(existing) = is_tracked_by_convoy(&beads, bead) {
                    eprintln!("{}", conflict_report(&beads, bead, &existing));
                    return Err(ConvoyError::AlreadyTracked {
                        bead: bead.clone(),
                        convoy: existing,
                    }
                    .into());
                }
            }
            if bead_ids.len() == 1 {
                let issue = beads.show(&bead_ids[0])?;
                let convoy_id =
                    create_auto_convoy(&beads, &bead_ids[0], &issue.title, owned, &merge)?;
                println!("Created convoy {convoy_id} tracking {}", bead_ids[0]);
            } else {
                let (convoy_id, tracked) =
                    create_batch_convoy(&beads, &bead_ids, &rig, owned, &merge)?;
                println!(
                    "Created convoy {convoy_id} tracking {}/{} beads",
                    tracked.len(),
                    bead_ids.len()
                );
                for bead in bead_ids.iter().filter(|b| !tracked.contains(b)) {
                    println!("  ! {bead} could not be tracked");
                }
            }
        }
        ConvoyCmd::Close { convoy_id, reason } => {
            let current = beads.show(&convoy_id)?;
            validate_convoy_status_transition(&current.status, "closed")?;
            beads.close(&convoy_id, &reason)?;
            println!("Closed convoy {convoy_id}");
        }
        ConvoyCmd::Status { convoy_id, status } => {
            let normalized = ensure_known_convoy_status(&status)?;
            let current = beads.show(&convoy_id)?;
            validate_convoy_status_transition(&current.status, &normalized)?;
            beads.update(
                &convoy_id,
                &UpdateOptions {
                    status: Some(normalized.clone()),
                    ..Default::default()
                },
            )?;
            println!("Convoy {convoy_id}: {} -> {normalized}", current.status);
        }
    }
    Ok(())
}
