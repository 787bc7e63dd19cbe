//! Doctor patrol: probe the store, report health, respond to alerts.
//!
//! Responses fire in a fixed order (restart, escalate, janitor, backup) and
//! each action honours its own cooldown independently. A report field that
//! carries an error must never trigger its action: acting on a failed
//! measurement is how a flaky probe restarts a healthy server.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::DaemonPatrolConfig;
use crate::daemon::patrol::doctor_dog_databases;
use crate::dolt::{DoltClient, dir_size};

/// Latency above this (strictly) escalates.
pub const DOCTOR_LATENCY_ALERT_MS: f64 = 5000.0;
/// Database count above this (strictly) calls the janitor.
pub const DOCTOR_ORPHAN_ALERT_COUNT: usize = 20;
/// Backup age above this (strictly) triggers a backup.
pub const DOCTOR_BACKUP_STALE_SECONDS: f64 = 3600.0;
/// Per-action cooldown.
pub const DOCTOR_ACTION_COOLDOWN: Duration = Duration::from_secs(3600);

const TCP_PROBE_BUDGET: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DoctorLatencyReport {
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DoctorDatabasesReport {
    pub names: Vec<String>,
    pub count: usize,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DoctorDiskReport {
    pub database: String,
    pub size_bytes: u64,
    pub size_mb: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DoctorBackupReport {
    pub age_seconds: f64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// One doctor probe cycle's findings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DoctorDogReport {
    pub timestamp: String,
    pub host: String,
    pub port: u16,
    pub tcp_reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<DoctorLatencyReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub databases: Option<DoctorDatabasesReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disk_usage: Vec<DoctorDiskReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_age: Option<DoctorBackupReport>,
}

/// Actions the responder may request, in firing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoctorAction {
    RestartServer,
    Escalate,
    Janitor,
    Backup,
}

/// Run one probe cycle. Probe failures land in the report's error fields;
/// this function itself never fails.
pub fn run_doctor_dog(
    town: &Path,
    config: Option<&DaemonPatrolConfig>,
    dolt: &DoltClient,
) -> DoctorDogReport {
    let mut report = DoctorDogReport {
        timestamp: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default(),
        host: dolt.host().to_string(),
        port: dolt.port(),
        tcp_reachable: dolt.tcp_probe(TCP_PROBE_BUDGET),
        ..Default::default()
    };

    if report.tcp_reachable {
        report.latency = Some(match dolt.latency_probe("hq") {
            Ok(elapsed) => DoctorLatencyReport {
                duration_ms: elapsed.as_secs_f64() * 1000.0,
                error: String::new(),
            },
            Err(err) => DoctorLatencyReport {
                duration_ms: 0.0,
                error: err.to_string(),
            },
        });
    }

    report.databases = Some(match dolt.list_databases() {
        Ok(names) => DoctorDatabasesReport {
            count: names.len(),
            names,
            error: String::new(),
        },
        Err(err) => DoctorDatabasesReport {
            error: err.to_string(),
            ..Default::default()
        },
    });

    for db in doctor_dog_databases(config) {
        let path = crate::paths::dolt_data_dir(town).join(&db);
        if !path.is_dir() {
            continue;
        }
        if let Ok(size) = dir_size(&path) {
            report.disk_usage.push(DoctorDiskReport {
                database: db,
                size_bytes: size,
                size_mb: size / (1024 * 1024),
            });
        }
    }

    report.backup_age = Some(match backup_age_seconds(town) {
        Ok(Some(age)) => DoctorBackupReport {
            age_seconds: age,
            error: String::new(),
        },
        Ok(None) => DoctorBackupReport {
            age_seconds: 0.0,
            error: "no backup found".to_string(),
        },
        Err(err) => DoctorBackupReport {
            age_seconds: 0.0,
            error: err.to_string(),
        },
    });

    report
}

/// Seconds since the newest file in the backup mirror, or `None` when the
/// mirror is empty or absent.
fn backup_age_seconds(town: &Path) -> std::io::Result<Option<f64>> {
    let repo = super::backup::backup_repo_dir(town);
    if !repo.is_dir() {
        return Ok(None);
    }
    let mut newest: Option<std::time::SystemTime> = None;
    let mut stack = vec![repo];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_name() == ".git" {
                continue;
            }
            let meta = entry.metadata()?;
            if meta.is_dir() {
                stack.push(entry.path());
            } else if let Ok(modified) = meta.modified() {
                newest = Some(match newest {
                    Some(cur) if cur >= modified => cur,
                    _ => modified,
                });
            }
        }
    }
    Ok(newest.and_then(|m| m.elapsed().ok()).map(|d| d.as_secs_f64()))
}

/// Cooldown-gated alert responder.
#[derive(Debug, Default)]
pub struct DoctorResponder {
    last_restart: Option<Instant>,
    last_escalate: Option<Instant>,
    last_janitor: Option<Instant>,
    last_backup: Option<Instant>,
}

impl DoctorResponder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide which actions the report warrants, honouring cooldowns.
    ///
    /// Thresholds are strictly-greater: a value exactly at the line does not
    /// trigger. Fields carrying an error are skipped entirely.
    pub fn respond(&mut self, report: &DoctorDogReport, now: Instant) -> Vec<DoctorAction> {
        let mut actions = Vec::new();

        if !report.tcp_reachable && Self::take(&mut self.last_restart, now) {
            tracing::warn!(patrol = "doctor_dog", "ACTION: store unreachable, restarting server");
            actions.push(DoctorAction::RestartServer);
        }

        if let Some(latency) = &report.latency
            && latency.error.is_empty()
            && latency.duration_ms > DOCTOR_LATENCY_ALERT_MS
            && Self::take(&mut self.last_escalate, now)
        {
            tracing::warn!(
                patrol = "doctor_dog",
                latency_ms = latency.duration_ms,
                "ACTION: latency over threshold, escalating"
            );
            actions.push(DoctorAction::Escalate);
        }

        if let Some(databases) = &report.databases
            && databases.error.is_empty()
            && databases.count > DOCTOR_ORPHAN_ALERT_COUNT
            && Self::take(&mut self.last_janitor, now)
        {
            tracing::warn!(
                patrol = "doctor_dog",
                count = databases.count,
                "ACTION: orphan database count over threshold, running janitor"
            );
            actions.push(DoctorAction::Janitor);
        }

        if let Some(backup) = &report.backup_age
            && backup.error.is_empty()
            && backup.age_seconds > DOCTOR_BACKUP_STALE_SECONDS
            && Self::take(&mut self.last_backup, now)
        {
            tracing::warn!(
                patrol = "doctor_dog",
                age_seconds = backup.age_seconds,
                "ACTION: backup stale, triggering backup"
            );
            actions.push(DoctorAction::Backup);
        }

        actions
    }

    fn take(slot: &mut Option<Instant>, now: Instant) -> bool {
        if slot.is_some_and(|last| now.duration_since(last) < DOCTOR_ACTION_COOLDOWN) {
            return false;
        }
        *slot = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alerting_report() -> DoctorDogReport {
        DoctorDogReport {
            tcp_reachable: false,
            latency: Some(DoctorLatencyReport {
                duration_ms: 10_000.0,
                error: String::new(),
            }),
            databases: Some(DoctorDatabasesReport {
                count: 30,
                ..Default::default()
            }),
            backup_age: Some(DoctorBackupReport {
                age_seconds: 7200.0,
                error: String::new(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn thresholds_match_contract() {
        assert_eq!(DOCTOR_LATENCY_ALERT_MS, 5000.0);
        assert_eq!(DOCTOR_ORPHAN_ALERT_COUNT, 20);
        assert_eq!(DOCTOR_BACKUP_STALE_SECONDS, 3600.0);
        assert!(DOCTOR_ACTION_COOLDOWN > Duration::ZERO);
    }

    #[test]
    fn all_alerts_fire_in_fixed_order() {
        let mut responder = DoctorResponder::new();
        let actions = responder.respond(&alerting_report(), Instant::now());
        assert_eq!(
            actions,
            vec![
                DoctorAction::RestartServer,
                DoctorAction::Escalate,
                DoctorAction::Janitor,
                DoctorAction::Backup,
            ]
        );
    }

    #[test]
    fn cooldown_suppresses_repeat_actions() {
        let mut responder = DoctorResponder::new();
        let now = Instant::now();
        assert_eq!(responder.respond(&alerting_report(), now).len(), 4);
        // Immediately again: every action is inside its cooldown.
        assert!(responder.respond(&alerting_report(), now).is_empty());
        // After the cooldown they fire again.
        let later = now + DOCTOR_ACTION_COOLDOWN + Duration::from_secs(1);
        assert_eq!(responder.respond(&alerting_report(), later).len(), 4);
    }

    #[test]
    fn cooldowns_are_independent_per_action() {
        let mut responder = DoctorResponder::new();
        let now = Instant::now();

        // Only the backup alert fires first.
        let backup_only = DoctorDogReport {
            tcp_reachable: true,
            backup_age: Some(DoctorBackupReport {
                age_seconds: 7200.0,
                error: String::new(),
            }),
            ..Default::default()
        };
        assert_eq!(
            responder.respond(&backup_only, now),
            vec![DoctorAction::Backup]
        );

        // A full alert report right after: backup is cooling down, the
        // other three still fire.
        let actions = responder.respond(&alerting_report(), now);
        assert_eq!(
            actions,
            vec![
                DoctorAction::RestartServer,
                DoctorAction::Escalate,
                DoctorAction::Janitor,
            ]
        );
    }

    #[test]
    fn healthy_report_takes_no_action() {
        let mut responder = DoctorResponder::new();
        let report = DoctorDogReport {
            tcp_reachable: true,
            latency: Some(DoctorLatencyReport {
                duration_ms: 1.5,
                error: String::new(),
            }),
            databases: Some(DoctorDatabasesReport {
                names: vec!["hq".to_string(), "beads".to_string()],
                count: 2,
                error: String::new(),
            }),
            backup_age: Some(DoctorBackupReport {
                age_seconds: 300.0,
                error: String::new(),
            }),
            ..Default::default()
        };
        assert!(responder.respond(&report, Instant::now()).is_empty());
    }

    #[test]
    fn exact_threshold_does_not_trigger() {
        let mut responder = DoctorResponder::new();
        let report = DoctorDogReport {
            tcp_reachable: true,
            latency: Some(DoctorLatencyReport {
                duration_ms: DOCTOR_LATENCY_ALERT_MS,
                error: String::new(),
            }),
            databases: Some(DoctorDatabasesReport {
                count: DOCTOR_ORPHAN_ALERT_COUNT,
                ..Default::default()
            }),
            backup_age: Some(DoctorBackupReport {
                age_seconds: DOCTOR_BACKUP_STALE_SECONDS,
                error: String::new(),
            }),
            ..Default::default()
        };
        assert!(responder.respond(&report, Instant::now()).is_empty());
    }

    #[test]
    fn errored_fields_never_trigger() {
        let mut responder = DoctorResponder::new();
        let report = DoctorDogReport {
            tcp_reachable: true,
            latency: Some(DoctorLatencyReport {
                duration_ms: 10_000.0,
                error: "connection reset".to_string(),
            }),
            databases: Some(DoctorDatabasesReport {
                count: 30,
                error: "query timeout".to_string(),
                ..Default::default()
            }),
            backup_age: Some(DoctorBackupReport {
                age_seconds: 7200.0,
                error: "walk error".to_string(),
            }),
            ..Default::default()
        };
        assert!(responder.respond(&report, Instant::now()).is_empty());
    }

    #[test]
    fn report_json_omits_absent_sections() {
        let report = DoctorDogReport {
            timestamp: "2026-02-27T12:00:00Z".to_string(),
            host: "127.0.0.1".to_string(),
            port: 3307,
            tcp_reachable: false,
            ..Default::default()
        };
        let raw: serde_json::Value = serde_json::from_str(
            &serde_json::to_string(&report).expect("serialize"),
        )
        .expect("parse");
        let obj = raw.as_object().unwrap();
        assert!(!obj.contains_key("latency"));
        assert!(!obj.contains_key("databases"));
        assert!(!obj.contains_key("backup_age"));
        assert!(!obj.contains_key("disk_usage"));
    }

    #[test]
    fn report_json_round_trips() {
        let report = DoctorDogReport {
            timestamp: "2026-02-27T12:00:00Z".to_string(),
            host: "127.0.0.1".to_string(),
            port: 3307,
            tcp_reachable: true,
            latency: Some(DoctorLatencyReport {
                duration_ms: 1.5,
                error: String::new(),
            }),
            databases: Some(DoctorDatabasesReport {
                names: vec!["hq".to_string(), "beads".to_string()],
                count: 2,
                error: String::new(),
            }),
            disk_usage: vec![DoctorDiskReport {
                database: "hq".to_string(),
                size_bytes: 1_048_576,
                size_mb: 1,
            }],
            ..Default::default()
        };
        let decoded: DoctorDogReport = serde_json::from_str(
            &serde_json::to_string(&report).expect("serialize"),
        )
        .expect("decode");
        assert!(decoded.tcp_reachable);
        assert_eq!(decoded.latency.unwrap().duration_ms, 1.5);
        assert_eq!(decoded.databases.unwrap().count, 2);
        assert_eq!(decoded.disk_usage[0].database, "hq");
    }
}
