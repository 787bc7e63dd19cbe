//! Patrol scheduling: enabled/interval config accessors and the clock-driven
//! run state that stops a patrol from being started twice.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::{DaemonPatrolConfig, parse_interval};

pub const PATROL_WITNESS: &str = "witness";
pub const PATROL_REFINERY: &str = "refinery";
pub const PATROL_WISP_REAPER: &str = "wisp_reaper";
pub const PATROL_COMPACTOR_DOG: &str = "compactor_dog";
pub const PATROL_DOCTOR_DOG: &str = "doctor_dog";
pub const PATROL_JSONL_GIT_BACKUP: &str = "jsonl_git_backup";
pub const PATROL_DOLT_REMOTES: &str = "dolt_remotes";
pub const PATROL_SCHEDULED_MAINTENANCE: &str = "scheduled_maintenance";

/// Every patrol the scheduler knows about, in fan-out order.
pub const ALL_PATROLS: &[&str] = &[
    PATROL_WITNESS,
    PATROL_REFINERY,
    PATROL_WISP_REAPER,
    PATROL_COMPACTOR_DOG,
    PATROL_DOCTOR_DOG,
    PATROL_JSONL_GIT_BACKUP,
    PATROL_DOLT_REMOTES,
    PATROL_SCHEDULED_MAINTENANCE,
];

pub const DEFAULT_WISP_REAPER_INTERVAL: Duration = Duration::from_secs(3600);
pub const DEFAULT_WISP_MAX_AGE: Duration = Duration::from_secs(24 * 3600);
pub const DEFAULT_WISP_DELETE_AGE: Duration = Duration::from_secs(7 * 24 * 3600);
pub const DEFAULT_STALE_ISSUE_AGE: Duration = Duration::from_secs(30 * 24 * 3600);
pub const DEFAULT_COMPACTOR_INTERVAL: Duration = Duration::from_secs(24 * 3600);
pub const DEFAULT_DOCTOR_DOG_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_BACKUP_INTERVAL: Duration = Duration::from_secs(24 * 3600);
pub const DEFAULT_DOLT_REMOTES_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Commit threshold when compaction runs from the scheduled path.
pub const COMPACTOR_SCHEDULED_THRESHOLD: u64 = 1000;
/// Commit threshold for a standalone (manual) compaction check.
pub const COMPACTOR_STANDALONE_THRESHOLD: u64 = 10_000;

pub const DEFAULT_SPIKE_THRESHOLD: f64 = 0.20;

fn reaper_config(config: Option<&DaemonPatrolConfig>) -> Option<&crate::config::WispReaperConfig> {
    config
        .and_then(|c| c.patrols.as_ref())
        .and_then(|p| p.wisp_reaper.as_ref())
}

pub fn wisp_reaper_interval(config: Option<&DaemonPatrolConfig>) -> Duration {
    parse_interval(
        reaper_config(config).and_then(|c| c.interval.as_deref()),
        DEFAULT_WISP_REAPER_INTERVAL,
    )
}

pub fn wisp_reaper_max_age(config: Option<&DaemonPatrolConfig>) -> Duration {
    parse_interval(
        reaper_config(config).and_then(|c| c.max_age.as_deref()),
        DEFAULT_WISP_MAX_AGE,
    )
}

pub fn wisp_delete_age(config: Option<&DaemonPatrolConfig>) -> Duration {
    parse_interval(
        reaper_config(config).and_then(|c| c.delete_age.as_deref()),
        DEFAULT_WISP_DELETE_AGE,
    )
}

pub fn stale_issue_age(config: Option<&DaemonPatrolConfig>) -> Duration {
    parse_interval(
        reaper_config(config).and_then(|c| c.stale_issue_age.as_deref()),
        DEFAULT_STALE_ISSUE_AGE,
    )
}

pub fn compactor_interval(config: Option<&DaemonPatrolConfig>) -> Duration {
    parse_interval(
        config
            .and_then(|c| c.patrols.as_ref())
            .and_then(|p| p.compactor_dog.as_ref())
            .and_then(|c| c.interval.as_deref()),
        DEFAULT_COMPACTOR_INTERVAL,
    )
}

pub fn compactor_threshold(config: Option<&DaemonPatrolConfig>) -> u64 {
    config
        .and_then(|c| c.patrols.as_ref())
        .and_then(|p| p.compactor_dog.as_ref())
        .and_then(|c| c.threshold)
        .filter(|&t| t > 0)
        .unwrap_or(COMPACTOR_SCHEDULED_THRESHOLD)
}

pub fn doctor_dog_interval(config: Option<&DaemonPatrolConfig>) -> Duration {
    parse_interval(
        config
            .and_then(|c| c.patrols.as_ref())
            .and_then(|p| p.doctor_dog.as_ref())
            .and_then(|c| c.interval.as_deref()),
        DEFAULT_DOCTOR_DOG_INTERVAL,
    )
}

/// Databases the doctor probes when none are configured.
pub fn doctor_dog_databases(config: Option<&DaemonPatrolConfig>) -> Vec<String> {
    if let Some(dbs) = config
        .and_then(|c| c.patrols.as_ref())
        .and_then(|p| p.doctor_dog.as_ref())
        .and_then(|c| c.databases.as_ref())
        && !dbs.is_empty()
    {
        return dbs.clone();
    }
    ["hq", "beads", "gastown", "mayor", "wisps", "formulas"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn backup_interval(config: Option<&DaemonPatrolConfig>) -> Duration {
    parse_interval(
        config
            .and_then(|c| c.patrols.as_ref())
            .and_then(|p| p.jsonl_git_backup.as_ref())
            .and_then(|c| c.interval.as_deref()),
        DEFAULT_BACKUP_INTERVAL,
    )
}

/// Spike threshold as a fraction; out-of-range values use the default.
pub fn spike_threshold(config: Option<&DaemonPatrolConfig>) -> f64 {
    config
        .and_then(|c| c.patrols.as_ref())
        .and_then(|p| p.jsonl_git_backup.as_ref())
        .and_then(|c| c.spike_threshold)
        .filter(|&t| t > 0.0 && t <= 1.0)
        .unwrap_or(DEFAULT_SPIKE_THRESHOLD)
}

pub fn dolt_remotes_interval(config: Option<&DaemonPatrolConfig>) -> Duration {
    parse_interval(
        config
            .and_then(|c| c.patrols.as_ref())
            .and_then(|p| p.dolt_remotes.as_ref())
            .and_then(|c| c.interval.as_deref()),
        DEFAULT_DOLT_REMOTES_INTERVAL,
    )
}

/// Run state for one patrol.
#[derive(Debug, Default, Clone, Copy)]
struct PatrolEntry {
    last_run: Option<Instant>,
    running: bool,
}

/// Clock-driven patrol run state, shared between the tick loop and the
/// worker threads it spawns.
#[derive(Debug, Default)]
pub struct PatrolScheduler {
    entries: Mutex<BTreeMap<&'static str, PatrolEntry>>,
}

impl PatrolScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a patrol for execution.
    ///
    /// Returns true when the patrol is due (never ran, or `interval`
    /// elapsed) and not currently running; the claim marks it running so a
    /// second tick cannot start it again.
    pub fn try_claim(&self, name: &'static str, interval: Duration, now: Instant) -> bool {
        let mut entries = self.entries.lock().expect("patrol state lock poisoned");
        let entry = entries.entry(name).or_default();
        if entry.running {
            return false;
        }
        let due = match entry.last_run {
            None => true,
            Some(last) => now.duration_since(last) >= interval,
        };
        if due {
            entry.running = true;
        }
        due
    }

    /// Mark a claimed patrol finished. `last_run` updates here, after the
    /// patrol returns, so slow patrols do not drift their own schedule.
    pub fn finish(&self, name: &'static str, now: Instant) {
        let mut entries = self.entries.lock().expect("patrol state lock poisoned");
        let entry = entries.entry(name).or_default();
        entry.running = false;
        entry.last_run = Some(now);
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.entries
            .lock()
            .expect("patrol state lock poisoned")
            .get(name)
            .is_some_and(|e| e.running)
    }

    pub fn last_run(&self, name: &str) -> Option<Instant> {
        self.entries
            .lock()
            .expect("patrol state lock poisoned")
            .get(name)
            .and_then(|e| e.last_run)
    }
}
