//! Serde shapes for the daemon patrol config and the rig inventory.
//!
//! Unknown fields are tolerated everywhere so older daemons can read configs
//! written by newer tools. Intervals and ages travel as humantime strings
//! ("15m", "24h"); invalid or non-positive values fall back to the patrol's
//! documented default at the point of use.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// `<town>/mayor/daemon.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonPatrolConfig {
    #[serde(rename = "type")]
    pub config_type: String,
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patrols: Option<PatrolsConfig>,
}

impl DaemonPatrolConfig {
    pub fn new() -> Self {
        Self {
            config_type: "daemon-patrol-config".to_string(),
            version: 1,
            patrols: None,
        }
    }
}

/// Per-patrol sections. Absent section = patrol defaults apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatrolsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub witness: Option<SimplePatrolConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refinery: Option<SimplePatrolConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deacon: Option<SimplePatrolConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wisp_reaper: Option<WispReaperConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compactor_dog: Option<CompactorDogConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doctor_dog: Option<DoctorDogConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsonl_git_backup: Option<JsonlGitBackupConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dolt_remotes: Option<DoltRemotesConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_maintenance: Option<ScheduledMaintenanceConfig>,
}

/// Enabled flag only (witness, refinery, deacon).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimplePatrolConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WispReaperConfig {
    pub enabled: bool,
    /// How often the reaper runs (default 1h).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    /// Ephemeral rows older than this are deleted (default 24h).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,
    /// Long-lived wisps older than this are deleted (default 168h).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_age: Option<String>,
    /// Open issues untouched for this long are auto-closed (default 720h).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_issue_age: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactorDogConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    /// Commit count that triggers compaction (default 1000 scheduled,
    /// 10000 standalone).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DoctorDogConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    /// Databases to probe; defaults to the well-known set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub databases: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonlGitBackupConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    /// Line-count delta (fraction, 0..=1) that flags a spike (default 0.20).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spike_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DoltRemotesConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduledMaintenanceConfig {
    pub enabled: bool,
    /// Window start, 24-hour "HH:MM" local time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
    /// "daily", "weekly", "monthly", or a parseable duration ("48h").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    /// Minimum commit count before maintenance triggers (default 1000).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u64>,
}

/// `<town>/mayor/rigs.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RigsConfig {
    pub rigs: BTreeMap<String, RigEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RigEntry {
    /// Bead id prefix this rig owns (e.g. "gt").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Working directory for agents on this rig, relative to the town root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Whether a patrol should run given the loaded config.
///
/// Known default-on patrols are enabled when the config (or their section)
/// is absent; opt-in patrols require an explicit `enabled: true`.
pub fn is_patrol_enabled(config: Option<&DaemonPatrolConfig>, name: &str) -> bool {
    let patrols = config.and_then(|c| c.patrols.as_ref());
    match name {
        "witness" => patrols
            .and_then(|p| p.witness.as_ref())
            .map_or(true, |c| c.enabled),
        "refinery" => patrols
            .and_then(|p| p.refinery.as_ref())
            .map_or(true, |c| c.enabled),
        "deacon" => patrols
            .and_then(|p| p.deacon.as_ref())
            .map_or(true, |c| c.enabled),
        "wisp_reaper" => patrols
            .and_then(|p| p.wisp_reaper.as_ref())
            .map_or(true, |c| c.enabled),
        "compactor_dog" => patrols
            .and_then(|p| p.compactor_dog.as_ref())
            .is_some_and(|c| c.enabled),
        "doctor_dog" => patrols
            .and_then(|p| p.doctor_dog.as_ref())
            .is_some_and(|c| c.enabled),
        "jsonl_git_backup" => patrols
            .and_then(|p| p.jsonl_git_backup.as_ref())
            .is_some_and(|c| c.enabled),
        "dolt_remotes" => patrols
            .and_then(|p| p.dolt_remotes.as_ref())
            .is_some_and(|c| c.enabled),
        "scheduled_maintenance" => patrols
            .and_then(|p| p.scheduled_maintenance.as_ref())
            .is_some_and(|c| c.enabled),
        _ => false,
    }
}

/// Parse a humantime interval string, falling back to `default` when the
/// value is absent, unparseable, or non-positive.
pub fn parse_interval(value: Option<&str>, default: Duration) -> Duration {
    match value {
        Some(s) => match humantime::parse_duration(s.trim()) {
            Ok(d) if !d.is_zero() => d,
            _ => default,
        },
        None => default,
    }
}
