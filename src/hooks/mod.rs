//! Hooks sync: push the town's base hook configuration into each agent
//! workspace's settings file.
//!
//! Settings files belong to the agents and may carry unrelated keys; sync
//! replaces only the `hooks` section. Integrity rule: a malformed settings
//! file FAILS CLOSED: sync refuses to touch it rather than guessing, since
//! overwriting a half-corrupt file destroys whatever the agent had there.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Transience;

#[derive(Debug, Error)]
pub enum HooksError {
    #[error("hooks sync failed closed: settings file {path} is malformed: {reason}")]
    MalformedTarget { path: String, reason: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {reason}")]
    Write { path: String, reason: String },
}

impl HooksError {
    pub fn transience(&self) -> Transience {
        match self {
            HooksError::MalformedTarget { .. } => Transience::Permanent,
            HooksError::Read { .. } | HooksError::Write { .. } => Transience::Unknown,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Hook {
    #[serde(rename = "type")]
    pub hook_type: String,
    pub command: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HookEntry {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub matcher: String,
    pub hooks: Vec<Hook>,
}

/// Base hook configuration, keyed by event name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "PascalCase")]
pub struct HooksConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub session_start: Vec<HookEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub session_end: Vec<HookEntry>,
}

/// Outcome of one target sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
}

fn base_config_path(town: &Path) -> PathBuf {
    town.join("mayor").join("hooks.json")
}

/// Load the town's base hook configuration; absent file is an empty config.
pub fn load_base(town: &Path) -> Result<HooksConfig, HooksError> {
    let path = base_config_path(town);
    let data = match std::fs::read(&path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(HooksConfig::default());
        }
        Err(err) => {
            return Err(HooksError::Read {
                path: path.display().to_string(),
                source: err,
            });
        }
    };
    serde_json::from_slice(&data).map_err(|e| HooksError::MalformedTarget {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Save the base hook configuration.
pub fn save_base(town: &Path, config: &HooksConfig) -> Result<(), HooksError> {
    let path = base_config_path(town);
    let data = serde_json::to_vec_pretty(config).map_err(|e| HooksError::Write {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    write_atomic(&path, &data)
}

/// Sync the base hooks into one settings file, preserving every other key
/// the file carries.
pub fn sync_target(base: &HooksConfig, target: &Path) -> Result<SyncOutcome, HooksError> {
    let hooks_value = serde_json::to_value(base).map_err(|e| HooksError::Write {
        path: target.display().to_string(),
        reason: e.to_string(),
    })?;

    let existing = match std::fs::read(target) {
        Ok(data) => Some(data),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            return Err(HooksError::Read {
                path: target.display().to_string(),
                source: err,
            });
        }
    };

    let (mut settings, outcome) = match existing {
        None => (serde_json::Map::new(), SyncOutcome::Created),
        Some(data) => {
            // A settings file we cannot parse is one we must not rewrite.
            let parsed: serde_json::Map<String, serde_json::Value> =
                serde_json::from_slice(&data).map_err(|e| HooksError::MalformedTarget {
                    path: target.display().to_string(),
                    reason: e.to_string(),
                })?;
            if parsed.get("hooks") == Some(&hooks_value) {
                return Ok(SyncOutcome::Unchanged);
            }
            (parsed, SyncOutcome::Updated)
        }
    };

    settings.insert("hooks".to_string(), hooks_value);
    let data = serde_json::to_vec_pretty(&serde_json::Value::Object(settings)).map_err(|e| {
        HooksError::Write {
            path: target.display().to_string(),
            reason: e.to_string(),
        }
    })?;
    write_atomic(target, &data)?;
    Ok(outcome)
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), HooksError> {
    let dir = path.parent().ok_or_else(|| HooksError::Write {
        path: path.display().to_string(),
        reason: "missing parent directory".to_string(),
    })?;
    std::fs::create_dir_all(dir).map_err(|e| HooksError::Write {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| HooksError::Write {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    std::fs::write(temp.path(), data).map_err(|e| HooksError::Write {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    temp.persist(path).map_err(|e| HooksError::Write {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> HooksConfig {
        HooksConfig {
            session_start: vec![HookEntry {
                matcher: String::new(),
                hooks: vec![Hook {
                    hook_type: "command".to_string(),
                    command: "echo hello".to_string(),
                }],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn sync_creates_missing_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("crew/.claude/settings.json");

        let outcome = sync_target(&base(), &target).expect("sync");
        assert_eq!(outcome, SyncOutcome::Created);

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&target).unwrap()).unwrap();
        assert_eq!(
            raw["hooks"]["SessionStart"][0]["hooks"][0]["command"],
            "echo hello"
        );
    }

    #[test]
    fn sync_updates_hooks_preserving_other_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("settings.json");
        std::fs::write(
            &target,
            r#"{"editorMode":"vim","hooks":{"SessionStart":[{"hooks":[{"type":"command","command":"old"}]}]}}"#,
        )
        .unwrap();

        let outcome = sync_target(&base(), &target).expect("sync");
        assert_eq!(outcome, SyncOutcome::Updated);

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&target).unwrap()).unwrap();
        assert_eq!(raw["editorMode"], "vim");
        assert_eq!(
            raw["hooks"]["SessionStart"][0]["hooks"][0]["command"],
            "echo hello"
        );
    }

    #[test]
    fn sync_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("settings.json");

        assert_eq!(sync_target(&base(), &target).unwrap(), SyncOutcome::Created);
        assert_eq!(
            sync_target(&base(), &target).unwrap(),
            SyncOutcome::Unchanged
        );
    }

    #[test]
    fn malformed_settings_fail_closed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("settings.json");
        std::fs::write(&target, b"{ this is not json").unwrap();

        let err = sync_target(&base(), &target).unwrap_err();
        assert!(
            err.to_string().contains("failed closed"),
            "error should name the fail-closed contract: {err}"
        );

        // The broken file must be untouched.
        assert_eq!(std::fs::read(&target).unwrap(), b"{ this is not json");
    }

    #[test]
    fn base_round_trips() {
        let town = tempfile::tempdir().expect("tempdir");
        save_base(town.path(), &base()).expect("save");
        assert_eq!(load_base(town.path()).expect("load"), base());
    }

    #[test]
    fn missing_base_is_empty() {
        let town = tempfile::tempdir().expect("tempdir");
        assert_eq!(load_base(town.path()).expect("load"), HooksConfig::default());
    }
}
