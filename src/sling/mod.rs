//! Dispatch ("sling"): hand a bead to a rig and spawn a worker session.
//!
//! The per-bead advisory lock is the only correctness boundary: at most one
//! dispatch is in progress for a given bead at a time. Everything else is a
//! guard that fails cleanly with a remediation message.

mod lock;
mod queue;

pub use lock::{BeadLock, try_acquire_bead_lock};
pub use queue::{QueueMetadata, parse_queue_metadata, strip_queue_metadata};

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::Transience;
use crate::beads::{AttachmentFields, BeadsApi, BeadsError, UpdateOptions};
use crate::convoy::{self, ConvoyError, ConvoyInfo};
use crate::session::{AgentRole, Registry, SessionName, agent_env};
use crate::tmux::{SessionDriver, TmuxError};

#[derive(Debug, Error)]
pub enum SlingError {
    #[error("bead {bead_id} is already being slung")]
    AlreadySlinging { bead_id: String },

    #[error("dispatch lock io: {0}")]
    LockIo(#[source] std::io::Error),

    #[error("rig '{rig}' is parked - use 'gt rig unpark {rig}' first")]
    RigParked { rig: String },

    #[error("rig '{rig}' is docked - use 'gt rig undock {rig}' first")]
    RigDocked { rig: String },

    #[error("bead {bead_id} is closed; reopen it before slinging")]
    BeadClosed { bead_id: String },

    #[error(transparent)]
    Beads(#[from] BeadsError),

    #[error(transparent)]
    Convoy(#[from] ConvoyError),

    #[error("spawning session: {0}")]
    Spawn(#[from] TmuxError),
}

impl SlingError {
    pub fn transience(&self) -> Transience {
        match self {
            SlingError::AlreadySlinging { .. } => Transience::Retryable,
            SlingError::LockIo(_) => Transience::Retryable,
            SlingError::RigParked { .. }
            | SlingError::RigDocked { .. }
            | SlingError::BeadClosed { .. } => Transience::Permanent,
            SlingError::Beads(e) => e.transience(),
            SlingError::Convoy(e) => e.transience(),
            SlingError::Spawn(e) => e.transience(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SlingParams {
    pub bead_id: String,
    pub rig_name: String,
    pub town_root: PathBuf,
}

/// Dispatch knobs beyond the bead/rig pair.
#[derive(Debug, Clone)]
pub struct SlingOptions {
    /// Create an auto-convoy when the bead is not already tracked.
    pub create_convoy: bool,
    /// Mark the created convoy owner-managed (`gt:owned`).
    pub owned: bool,
    /// "direct", "mr", "local", or "" for the default (mr).
    pub merge_strategy: String,
    /// Formula to run in the session; empty = agent default.
    pub formula: String,
    /// Agent binary to exec; empty = "claude".
    pub agent: String,
}

impl Default for SlingOptions {
    fn default() -> Self {
        Self {
            create_convoy: true,
            owned: false,
            merge_strategy: String::new(),
            formula: String::new(),
            agent: String::new(),
        }
    }
}

/// Outcome record for a dispatch attempt.
#[derive(Debug, Clone, Default)]
pub struct SlingResult {
    pub bead_id: String,
    pub rig: String,
    pub session: String,
    pub convoy_id: String,
    /// Short machine-checkable failure tag ("rig parked", "bead closed", ...).
    pub err_msg: String,
}

/// Ephemeral per-rig wisp config file. Only the values map matters here;
/// unknown fields (rig name, timestamps) are tolerated.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WispConfigFile {
    values: serde_json::Map<String, serde_json::Value>,
}

/// "Parked" is an ephemeral flag in the rig's wisp config.
pub fn is_rig_parked(town: &Path, rig: &str) -> bool {
    let path = crate::paths::wisp_config_path(town, rig);
    let Ok(data) = std::fs::read(&path) else {
        return false;
    };
    let Ok(config) = serde_json::from_slice::<WispConfigFile>(&data) else {
        return false;
    };
    config
        .values
        .get("status")
        .and_then(|v| v.as_str())
        .is_some_and(|s| s == "parked")
}

/// "Docked" is a persistent label on the rig's identity bead.
pub fn is_rig_docked(api: &dyn BeadsApi, rig: &str, prefix: &str) -> bool {
    let rig_bead_id = format!("{prefix}-rig-{rig}");
    match api.show(&rig_bead_id) {
        Ok(bead) => bead.has_label("gt:docked"),
        // Missing identity bead is not evidence of docking.
        Err(_) => false,
    }
}

/// Execute a dispatch.
///
/// The per-bead lock is acquired first and held for the whole pipeline; it
/// releases when this function returns, success or failure. The spawned
/// session outlives the call: the lock must never outlive it the other way
/// around.
pub fn execute_sling(
    params: &SlingParams,
    opts: &SlingOptions,
    api: &dyn BeadsApi,
    driver: &dyn SessionDriver,
    registry: &Registry,
) -> (SlingResult, Option<SlingError>) {
    let mut result = SlingResult {
        bead_id: params.bead_id.clone(),
        rig: params.rig_name.clone(),
        ..Default::default()
    };

    // 1. Per-bead mutual exclusion.
    let _lock = match try_acquire_bead_lock(&params.town_root, &params.bead_id) {
        Ok(lock) => lock,
        Err(err) => {
            result.err_msg = "already being slung".to_string();
            return (result, Some(err));
        }
    };

    // 2. Rig availability.
    if is_rig_parked(&params.town_root, &params.rig_name) {
        result.err_msg = "rig parked".to_string();
        return (
            result,
            Some(SlingError::RigParked {
                rig: params.rig_name.clone(),
            }),
        );
    }
    let prefix = registry
        .prefix_for_rig(&params.rig_name)
        .unwrap_or("gt")
        .to_string();
    if is_rig_docked(api, &params.rig_name, &prefix) {
        result.err_msg = "rig docked".to_string();
        return (
            result,
            Some(SlingError::RigDocked {
                rig: params.rig_name.clone(),
            }),
        );
    }

    // 3. Closed-bead guard.
    let issue = match api.show(&params.bead_id) {
        Ok(issue) => issue,
        Err(err) => {
            result.err_msg = "bead lookup failed".to_string();
            return (result, Some(err.into()));
        }
    };
    if issue.is_closed() {
        result.err_msg = "bead closed".to_string();
        return (
            result,
            Some(SlingError::BeadClosed {
                bead_id: params.bead_id.clone(),
            }),
        );
    }

    // 4. Convoy: fast path, then resolve, then optional auto-create.
    let convoy_info = convoy::convoy_info_from_issue(api, &params.bead_id)
        .or_else(|| convoy::convoy_info_for_issue(api, &params.bead_id));
    let convoy_info = match convoy_info {
        Some(info) => Some(info),
        None if opts.create_convoy => {
            match convoy::create_auto_convoy(
                api,
                &params.bead_id,
                &issue.title,
                opts.owned,
                &opts.merge_strategy,
            ) {
                Ok(id) => Some(ConvoyInfo {
                    id,
                    owned: opts.owned,
                    merge_strategy: opts.merge_strategy.clone(),
                }),
                Err(err) => {
                    result.err_msg = "convoy create failed".to_string();
                    return (result, Some(err.into()));
                }
            }
        }
        None => None,
    };
    if let Some(info) = &convoy_info {
        result.convoy_id = info.id.clone();
    }

    // 5. Stamp queue metadata + attachment fields onto the bead.
    let mut metadata = QueueMetadata::new(&params.rig_name);
    metadata.formula = opts.formula.clone();
    metadata.merge = opts.merge_strategy.clone();
    metadata.agent = opts.agent.clone();
    metadata.owned = opts.owned;
    if let Some(info) = &convoy_info {
        metadata.convoy = info.id.clone();
    }

    let mut description = strip_queue_metadata(&issue.description).to_string();
    if let Some(info) = &convoy_info {
        let attachment = AttachmentFields {
            convoy_id: info.id.clone(),
            merge_strategy: info.merge_strategy.clone(),
            convoy_owned: info.owned,
        };
        if !description.is_empty() && !description.ends_with('\n') {
            description.push('\n');
        }
        description.push_str(&attachment.format());
    }
    if !description.is_empty() && !description.ends_with('\n') {
        description.push('\n');
    }
    description.push_str(&metadata.format());

    if let Err(err) = api.update(
        &params.bead_id,
        &UpdateOptions {
            description: Some(description),
            ..Default::default()
        },
    ) {
        result.err_msg = "queue stamp failed".to_string();
        return (result, Some(err.into()));
    }

    // 6. Spawn the worker session.
    let polecat = convoy::generate_short_id();
    let session = SessionName::new(&prefix, &params.rig_name, AgentRole::Polecat, &polecat);
    let session_name = session.format();

    let work_dir = params.town_root.join(&params.rig_name);
    let work_dir = if work_dir.is_dir() {
        work_dir.display().to_string()
    } else {
        String::new()
    };

    let agent = if opts.agent.is_empty() {
        "claude"
    } else {
        &opts.agent
    };
    let env = agent_env(
        AgentRole::Polecat,
        &params.rig_name,
        &polecat,
        &params.town_root,
    );
    let env_args: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();
    // exec replaces the placeholder shell so the pane command becomes the
    // agent binary; session health checks depend on that.
    let cmd = format!("exec env {} {agent}", env_args.join(" "));

    if let Err(err) = driver.new_session_with_command(&session_name, &work_dir, &cmd) {
        result.err_msg = "session spawn failed".to_string();
        return (result, Some(err.into()));
    }

    result.session = session_name;
    (result, None)
    // 7. `_lock` drops here, releasing the per-bead lock.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beads::Issue;
    use crate::beads::testing::FakeBeads;
    use crate::beads::PrefixRegistry;
    use std::sync::Mutex;

    /// Driver that records spawns and never touches a real multiplexer.
    #[derive(Default)]
    struct FakeDriver {
        spawned: Mutex<Vec<(String, String, String)>>,
        fail_spawn: bool,
    }

    impl SessionDriver for FakeDriver {
        fn list_sessions(&self) -> Result<Vec<String>, TmuxError> {
            Ok(Vec::new())
        }
        fn has_session(&self, _name: &str) -> Result<bool, TmuxError> {
            Ok(false)
        }
        fn new_session_with_command(
            &self,
            name: &str,
            work_dir: &str,
            cmd: &str,
        ) -> Result<(), TmuxError> {
            if self.fail_spawn {
                return Err(TmuxError::SessionUnhealthy {
                    session: name.to_string(),
                    command: "bash".to_string(),
                });
            }
            self.spawned.lock().unwrap().push((
                name.to_string(),
                work_dir.to_string(),
                cmd.to_string(),
            ));
            Ok(())
        }
        fn kill_session(&self, _name: &str) -> Result<(), TmuxError> {
            Ok(())
        }
        fn kill_session_with_processes(&self, _name: &str) -> Result<(), TmuxError> {
            Ok(())
        }
        fn send_keys(&self, _name: &str, _message: &str) -> Result<(), TmuxError> {
            Ok(())
        }
        fn send_keys_raw(&self, _name: &str, _key: &str) -> Result<(), TmuxError> {
            Ok(())
        }
        fn capture_pane(&self, _name: &str, _lines: u32) -> Result<String, TmuxError> {
            Ok(String::new())
        }
        fn get_pane_command(&self, _name: &str) -> Result<String, TmuxError> {
            Ok("claude".to_string())
        }
        fn get_all_environment(&self, _name: &str) -> Result<Vec<(String, String)>, TmuxError> {
            Ok(Vec::new())
        }
        fn set_environment(&self, _n: &str, _k: &str, _v: &str) -> Result<(), TmuxError> {
            Ok(())
        }
        fn get_global_environment(&self, _key: &str) -> Result<Option<String>, TmuxError> {
            Ok(None)
        }
        fn set_global_environment(&self, _k: &str, _v: &str) -> Result<(), TmuxError> {
            Ok(())
        }
    }

    fn test_registry() -> Registry {
        let mut prefixes = PrefixRegistry::new();
        prefixes.register("gt", "testrig");
        prefixes.register("hq", ".");
        Registry::new(prefixes)
    }

    fn park_rig(town: &Path, rig: &str) {
        let path = crate::paths::wisp_config_path(town, rig);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            format!(r#"{{"rig":"{rig}","values":{{"status":"parked"}}}}"#),
        )
        .unwrap();
    }

    fn open_bead(id: &str) -> Issue {
        Issue {
            id: id.to_string(),
            title: "Test work".to_string(),
            issue_type: "task".to_string(),
            status: "open".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn parked_rig_blocks_dispatch() {
        let town = tempfile::tempdir().expect("tempdir");
        park_rig(town.path(), "testrig");

        let api = FakeBeads::default().with_issue(open_bead("test-123"));
        let driver = FakeDriver::default();
        let params = SlingParams {
            bead_id: "test-123".to_string(),
            rig_name: "testrig".to_string(),
            town_root: town.path().to_path_buf(),
        };

        let (result, err) = execute_sling(
            &params,
            &SlingOptions::default(),
            &api,
            &driver,
            &test_registry(),
        );

        let err = err.expect("expected error for parked rig");
        let msg = err.to_string();
        for want in ["parked", "testrig", "unpark"] {
            assert!(msg.contains(want), "{msg:?} should contain {want}");
        }
        assert_eq!(result.err_msg, "rig parked");
        assert!(driver.spawned.lock().unwrap().is_empty());
    }

    #[test]
    fn held_lock_blocks_then_closed_guard_after_release() {
        let town = tempfile::tempdir().expect("tempdir");
        let api = FakeBeads::default().with_issue(Issue {
            status: "closed".to_string(),
            ..open_bead("gt-locktest1")
        });
        let driver = FakeDriver::default();
        let params = SlingParams {
            bead_id: "gt-locktest1".to_string(),
            rig_name: "testrig".to_string(),
            town_root: town.path().to_path_buf(),
        };

        // Hold the lock from outside, simulating a concurrent dispatch.
        let outer = try_acquire_bead_lock(town.path(), "gt-locktest1").expect("outer lock");
        let (_, err) = execute_sling(
            &params,
            &SlingOptions::default(),
            &api,
            &driver,
            &test_registry(),
        );
        assert!(
            err.expect("lock contention")
                .to_string()
                .contains("already being slung")
        );
        drop(outer);

        // Lock free now: the closed guard fires and releases the lock.
        let (result, err) = execute_sling(
            &params,
            &SlingOptions::default(),
            &api,
            &driver,
            &test_registry(),
        );
        assert!(matches!(err, Some(SlingError::BeadClosed { .. })));
        assert_eq!(result.err_msg, "bead closed");

        // And again: still the closed guard, never lock contention.
        let (_, err) = execute_sling(
            &params,
            &SlingOptions::default(),
            &api,
            &driver,
            &test_registry(),
        );
        let msg = err.expect("closed guard").to_string();
        assert!(!msg.contains("already being slung"), "lock leaked: {msg}");
    }

    #[test]
    fn successful_dispatch_stamps_and_spawns() {
        let town = tempfile::tempdir().expect("tempdir");
        let api = FakeBeads::default().with_issue(open_bead("gt-work1"));
        let driver = FakeDriver::default();
        let params = SlingParams {
            bead_id: "gt-work1".to_string(),
            rig_name: "testrig".to_string(),
            town_root: town.path().to_path_buf(),
        };

        let (result, err) = execute_sling(
            &params,
            &SlingOptions {
                merge_strategy: "direct".to_string(),
                ..Default::default()
            },
            &api,
            &driver,
            &test_registry(),
        );
        assert!(err.is_none(), "dispatch failed: {err:?}");
        assert!(result.convoy_id.starts_with("hq-cv-"));
        assert!(result.session.starts_with("gt-testrig-polecat-"));

        // The bead now carries queue metadata and attachment fields.
        let bead = api.show("gt-work1").unwrap();
        let meta = parse_queue_metadata(&bead.description).expect("queue metadata");
        assert_eq!(meta.target_rig, "testrig");
        assert_eq!(meta.convoy, result.convoy_id);
        assert_eq!(meta.merge, "direct");
        let attachment = crate::beads::parse_attachment_fields(&bead).expect("attachment");
        assert_eq!(attachment.convoy_id, result.convoy_id);

        // The spawned command exec-replaces the shell with the agent env.
        let spawned = driver.spawned.lock().unwrap();
        let (session, _dir, cmd) = &spawned[0];
        assert_eq!(session, &result.session);
        assert!(cmd.starts_with("exec env "));
        assert!(cmd.contains("GT_ROLE=polecat"));
        assert!(cmd.contains("GT_RIG=testrig"));
    }

    #[test]
    fn existing_convoy_is_reused_not_duplicated() {
        let town = tempfile::tempdir().expect("tempdir");
        let api = FakeBeads::default()
            .with_issue(open_bead("gt-work2"))
            .with_issue(Issue {
                id: "hq-cv-exist".to_string(),
                issue_type: "convoy".to_string(),
                status: "open".to_string(),
                description: "Auto-created convoy tracking gt-work2".to_string(),
                ..Default::default()
            });
        api.deps.lock().unwrap().push((
            "hq-cv-exist".to_string(),
            "gt-work2".to_string(),
            "tracks".to_string(),
        ));

        let driver = FakeDriver::default();
        let params = SlingParams {
            bead_id: "gt-work2".to_string(),
            rig_name: "testrig".to_string(),
            town_root: town.path().to_path_buf(),
        };

        let (result, err) = execute_sling(
            &params,
            &SlingOptions::default(),
            &api,
            &driver,
            &test_registry(),
        );
        assert!(err.is_none());
        assert_eq!(result.convoy_id, "hq-cv-exist");

        let convoys = api
            .issues
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.issue_type == "convoy")
            .count();
        assert_eq!(convoys, 1, "no duplicate convoy should be created");
    }

    #[test]
    fn spawn_failure_reports_cleanly() {
        let town = tempfile::tempdir().expect("tempdir");
        let api = FakeBeads::default().with_issue(open_bead("gt-work3"));
        let driver = FakeDriver {
            fail_spawn: true,
            ..Default::default()
        };
        let params = SlingParams {
            bead_id: "gt-work3".to_string(),
            rig_name: "testrig".to_string(),
            town_root: town.path().to_path_buf(),
        };

        let (result, err) = execute_sling(
            &params,
            &SlingOptions::default(),
            &api,
            &driver,
            &test_registry(),
        );
        assert!(matches!(err, Some(SlingError::Spawn(_))));
        assert_eq!(result.err_msg, "session spawn failed");
    }

    #[test]
    fn docked_rig_blocks_dispatch() {
        let town = tempfile::tempdir().expect("tempdir");
        let api = FakeBeads::default()
            .with_issue(open_bead("gt-work4"))
            .with_issue(Issue {
                id: "gt-rig-testrig".to_string(),
                issue_type: "rig".to_string(),
                status: "open".to_string(),
                labels: vec!["gt:docked".to_string()],
                ..Default::default()
            });
        let driver = FakeDriver::default();
        let params = SlingParams {
            bead_id: "gt-work4".to_string(),
            rig_name: "testrig".to_string(),
            town_root: town.path().to_path_buf(),
        };

        let (result, err) = execute_sling(
            &params,
            &SlingOptions::default(),
            &api,
            &driver,
            &test_registry(),
        );
        let msg = err.expect("docked error").to_string();
        assert!(msg.contains("docked") && msg.contains("undock"));
        assert_eq!(result.err_msg, "rig docked");
    }
}
