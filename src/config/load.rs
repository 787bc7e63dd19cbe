use std::fs;
use std::path::Path;

use thiserror::Error;

use super::{DaemonPatrolConfig, RigsConfig};
use crate::paths;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("not in a Gas Town workspace (set GT_HOME or run inside a town)")]
    NotInTown,

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write {path}: {reason}")]
    Write { path: String, reason: String },
}

/// Load the patrol config, or `None` when the file is absent or malformed.
///
/// Patrol config is advisory: a broken file must never stop the daemon, so
/// parse failures are logged and treated as "no config".
pub fn load_patrol_config(town: &Path) -> Option<DaemonPatrolConfig> {
    let path = paths::daemon_config_path(town);
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            tracing::warn!("failed to read {}: {err}", path.display());
            return None;
        }
    };
    match serde_json::from_slice(&data) {
        Ok(config) => Some(config),
        Err(err) => {
            tracing::warn!("failed to parse {}: {err}", path.display());
            None
        }
    }
}

/// Persist the patrol config atomically (temp file + rename).
pub fn save_patrol_config(town: &Path, config: &DaemonPatrolConfig) -> Result<(), ConfigError> {
    let path = paths::daemon_config_path(town);
    let data = serde_json::to_vec_pretty(config).map_err(|e| ConfigError::Write {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    atomic_write(&path, &data)
}

/// Load the rig inventory; missing file yields an empty inventory.
pub fn load_rigs_config(town: &Path) -> Result<RigsConfig, ConfigError> {
    let path = paths::rigs_config_path(town);
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(RigsConfig::default());
        }
        Err(err) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                source: err,
            });
        }
    };
    serde_json::from_slice(&data).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        source: e,
    })
}

pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> Result<(), ConfigError> {
    let dir = path.parent().ok_or_else(|| ConfigError::Write {
        path: path.display().to_string(),
        reason: "path missing parent directory".to_string(),
    })?;
    fs::create_dir_all(dir).map_err(|e| ConfigError::Write {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| ConfigError::Write {
        path: path.display().to_string(),
        reason: format!("temp file: {e}"),
    })?;
    fs::write(temp.path(), data).map_err(|e| ConfigError::Write {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    temp.persist(path).map_err(|e| ConfigError::Write {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PatrolsConfig, ScheduledMaintenanceConfig, is_patrol_enabled};

    #[test]
    fn load_missing_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load_patrol_config(dir.path()).is_none());
    }

    #[test]
    fn load_parses_enabled_flags() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mayor = dir.path().join("mayor");
        fs::create_dir_all(&mayor).unwrap();
        fs::write(
            mayor.join("daemon.json"),
            r#"{
                "type": "daemon-patrol-config",
                "version": 1,
                "patrols": {
                    "refinery": {"enabled": false},
                    "witness": {"enabled": true}
                }
            }"#,
        )
        .unwrap();

        let config = load_patrol_config(dir.path()).expect("config");
        assert!(!is_patrol_enabled(Some(&config), "refinery"));
        assert!(is_patrol_enabled(Some(&config), "witness"));
        assert!(is_patrol_enabled(Some(&config), "deacon"));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = DaemonPatrolConfig {
            patrols: Some(PatrolsConfig {
                scheduled_maintenance: Some(ScheduledMaintenanceConfig {
                    enabled: true,
                    window: Some("03:00".to_string()),
                    interval: Some("daily".to_string()),
                    threshold: Some(500),
                }),
                ..Default::default()
            }),
            ..DaemonPatrolConfig::new()
        };
        save_patrol_config(dir.path(), &config).expect("save");

        let loaded = load_patrol_config(dir.path()).expect("load");
        assert!(is_patrol_enabled(Some(&loaded), "scheduled_maintenance"));
        let sm = loaded
            .patrols
            .as_ref()
            .and_then(|p| p.scheduled_maintenance.as_ref())
            .expect("section");
        assert_eq!(sm.window.as_deref(), Some("03:00"));
        assert_eq!(sm.interval.as_deref(), Some("daily"));
        assert_eq!(sm.threshold, Some(500));
    }

    #[test]
    fn malformed_config_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mayor = dir.path().join("mayor");
        fs::create_dir_all(&mayor).unwrap();
        fs::write(mayor.join("daemon.json"), b"{ not json").unwrap();
        assert!(load_patrol_config(dir.path()).is_none());
    }

    #[test]
    fn rigs_config_missing_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rigs = load_rigs_config(dir.path()).expect("load");
        assert!(rigs.rigs.is_empty());
    }
}
