//! `gt rig`: availability controls.
//!
//! Park is ephemeral (wisp config); dock is persistent (a label on the
//! rig's identity bead). Either state blocks dispatch.

use clap::Subcommand;

use crate::Result;
use crate::beads::{Beads, BeadsApi};
use crate::session::init_registry;

#[derive(Subcommand, Debug)]
pub enum RigCmd {
    /// Park a rig (ephemeral; cleared by unpark or runtime wipe).
    Park { rig: String },
    /// Unpark a rig.
    Unpark { rig: String },
    /// Dock a rig (persistent until undock).
    Dock { rig: String },
    /// Undock a rig.
    Undock { rig: String },
}

pub(crate) fn handle(cmd: RigCmd) -> Result<()> {
    let town = super::super::require_town_root()?;
    match cmd {
        RigCmd::Park { rig } => {
            let path = crate::paths::wisp_config_path(&town, &rig);
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir).map_err(crate::daemon::DaemonError::Io)?;
            }
            let config = serde_json::json!({
                "rig": rig,
                "values": {"status": "parked"},
            });
            std::fs::write(&path, serde_json::to_vec_pretty(&config).unwrap_or_default())
                .map_err(crate::daemon::DaemonError::Io)?;
            println!("Rig '{rig}' parked");
        }
        RigCmd::Unpark { rig } => {
            let path = crate::paths::wisp_config_path(&town, &rig);
            match std::fs::remove_file(&path) {
                Ok(()) => println!("Rig '{rig}' unparked"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    println!("Rig '{rig}' was not parked");
                }
                Err(err) => return Err(crate::daemon::DaemonError::Io(err).into()),
            }
        }
        RigCmd::Dock { rig } => {
            let beads = Beads::new(crate::paths::town_beads_dir(&town)).with_auto_commit();
            beads.label_add(&rig_bead_id(&town, &rig)?, "gt:docked")?;
            println!("Rig '{rig}' docked");
        }
        RigCmd::Undock { rig } => {
            let beads = Beads::new(crate::paths::town_beads_dir(&town)).with_auto_commit();
            beads.label_remove(&rig_bead_id(&town, &rig)?, "gt:docked")?;
            println!("Rig '{rig}' undocked");
        }
    }
    Ok(())
}

fn rig_bead_id(town: &std::path::Path, rig: &str) -> Result<String> {
    let registry = init_registry(town).map_err(crate::daemon::DaemonError::Io)?;
    let prefix = registry.prefix_for_rig(rig).unwrap_or("gt");
    Ok(format!("{prefix}-rig-{rig}"))
}
