//! Town-root discovery and file layout helpers.
//!
//! Every durable artifact the supervisor touches lives at a fixed path under
//! the town root. Callers resolve the root once (env override or upward
//! search) and derive everything else from these helpers.

use std::path::{Path, PathBuf};

/// Resolve the town root.
///
/// `GT_HOME` wins if set and non-empty; otherwise walk upward from the
/// current directory looking for a town marker (a `mayor/` directory next to
/// a `.beads/` directory), falling back to the conventional `~/gt`.
pub fn find_town_root() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("GT_HOME")
        && !dir.trim().is_empty()
    {
        return Some(PathBuf::from(dir));
    }

    let mut dir = std::env::current_dir().ok()?;
    loop {
        if is_town_root(&dir) {
            return Some(dir);
        }
        if !dir.pop() {
            break;
        }
    }

    let home_town = dirs::home_dir()?.join("gt");
    is_town_root(&home_town).then_some(home_town)
}

/// True if `dir` looks like a town root.
pub fn is_town_root(dir: &Path) -> bool {
    dir.join("mayor").is_dir() && dir.join(".beads").is_dir()
}

/// `<town>/daemon`: supervisor runtime state.
pub fn daemon_dir(town: &Path) -> PathBuf {
    town.join("daemon")
}

/// `<town>/daemon/daemon.pid`: supervisor PID file.
pub fn daemon_pid_path(town: &Path) -> PathBuf {
    daemon_dir(town).join("daemon.pid")
}

/// `<town>/daemon/restart_state.json`: restart tracker state.
pub fn restart_state_path(town: &Path) -> PathBuf {
    daemon_dir(town).join("restart_state.json")
}

/// `<town>/daemon/escalations.jsonl`: escalation sink.
pub fn escalations_path(town: &Path) -> PathBuf {
    daemon_dir(town).join("escalations.jsonl")
}

/// `<town>/daemon/logs`: rolling daemon log files.
pub fn daemon_log_dir(town: &Path) -> PathBuf {
    daemon_dir(town).join("logs")
}

/// `<town>/daemon/dolt.pid`: store server PID file.
pub fn dolt_pid_path(town: &Path) -> PathBuf {
    daemon_dir(town).join("dolt.pid")
}

/// `<town>/daemon/dolt-server.log`: store server log.
pub fn dolt_log_path(town: &Path) -> PathBuf {
    daemon_dir(town).join("dolt-server.log")
}

/// `<town>/daemon/dolt-state.json`: store server state.
pub fn dolt_state_path(town: &Path) -> PathBuf {
    daemon_dir(town).join("dolt-state.json")
}

/// `<town>/.dolt-data`: versioned database data, one subdir per db.
pub fn dolt_data_dir(town: &Path) -> PathBuf {
    town.join(".dolt-data")
}

/// `<town>/mayor/daemon.json`: patrol config.
pub fn daemon_config_path(town: &Path) -> PathBuf {
    town.join("mayor").join("daemon.json")
}

/// `<town>/mayor/rigs.json`: rig inventory.
pub fn rigs_config_path(town: &Path) -> PathBuf {
    town.join("mayor").join("rigs.json")
}

/// `<town>/.beads`: town-level bead store working directory.
pub fn town_beads_dir(town: &Path) -> PathBuf {
    town.join(".beads")
}

/// `<town>/.beads/routes.jsonl`: prefix -> rig-directory routing table.
pub fn routes_path(town: &Path) -> PathBuf {
    town_beads_dir(town).join("routes.jsonl")
}

/// `<town>/.runtime`: ephemeral per-session state.
pub fn runtime_dir(town: &Path) -> PathBuf {
    town.join(".runtime")
}

/// `<town>/.runtime/heartbeats`: session heartbeat files.
pub fn heartbeats_dir(town: &Path) -> PathBuf {
    runtime_dir(town).join("heartbeats")
}

/// `<town>/.runtime/pids`: session PID files.
pub fn session_pids_dir(town: &Path) -> PathBuf {
    runtime_dir(town).join("pids")
}

/// `<town>/.runtime/locks`: advisory dispatch locks.
pub fn locks_dir(town: &Path) -> PathBuf {
    runtime_dir(town).join("locks")
}

/// `<town>/.runtime/wisp-config`: ephemeral per-rig wisp config.
pub fn wisp_config_dir(town: &Path) -> PathBuf {
    runtime_dir(town).join("wisp-config")
}

/// Per-rig wisp config file (parked flag and friends).
pub fn wisp_config_path(town: &Path, rig: &str) -> PathBuf {
    wisp_config_dir(town).join(format!("{rig}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_fixed() {
        let town = Path::new("/town");
        assert_eq!(dolt_pid_path(town), Path::new("/town/daemon/dolt.pid"));
        assert_eq!(
            dolt_log_path(town),
            Path::new("/town/daemon/dolt-server.log")
        );
        assert_eq!(
            dolt_state_path(town),
            Path::new("/town/daemon/dolt-state.json")
        );
        assert_eq!(
            restart_state_path(town),
            Path::new("/town/daemon/restart_state.json")
        );
        assert_eq!(
            daemon_config_path(town),
            Path::new("/town/mayor/daemon.json")
        );
        assert_eq!(rigs_config_path(town), Path::new("/town/mayor/rigs.json"));
        assert_eq!(
            heartbeats_dir(town),
            Path::new("/town/.runtime/heartbeats")
        );
        assert_eq!(session_pids_dir(town), Path::new("/town/.runtime/pids"));
        assert_eq!(routes_path(town), Path::new("/town/.beads/routes.jsonl"));
    }

    #[test]
    fn town_root_markers() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(!is_town_root(dir.path()));
        std::fs::create_dir_all(dir.path().join("mayor")).unwrap();
        std::fs::create_dir_all(dir.path().join(".beads")).unwrap();
        assert!(is_town_root(dir.path()));
    }
}
