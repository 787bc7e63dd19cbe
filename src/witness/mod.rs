//! Witness patrol: per-rig liveness verdicts for worker sessions.
//!
//! A zombie is an alive pane with no productive activity. The witness emits
//! one receipt per zombie: "stale" when there is evidence of recent work (a
//! known hook, or a was-active agent state), "orphan" when the session is
//! idle with nothing hooked.

use serde::{Deserialize, Serialize};

use crate::beads::{BeadsApi, ListOptions};
use crate::daemon::is_session_heartbeat_stale;
use crate::session::{AgentRole, Registry, SessionName};
use crate::tmux::SessionDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatrolVerdict {
    Stale,
    Orphan,
}

/// One detected zombie worker.
#[derive(Debug, Clone, Default)]
pub struct ZombieResult {
    pub polecat_name: String,
    pub agent_state: String,
    pub hook_bead: String,
    pub was_active: bool,
    pub action: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DetectZombiePolecatsResult {
    pub zombies: Vec<ZombieResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatrolEvidence {
    pub agent_state: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub hook_bead: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub error: String,
}

/// Receipt emitted for each zombie the patrol handled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatrolReceipt {
    pub rig: String,
    pub polecat: String,
    pub verdict: PatrolVerdict,
    pub recommended_action: String,
    pub evidence: PatrolEvidence,
}

/// Verdict for a zombie: stale when there was evidence of recent work,
/// orphan otherwise. Detection sets `was_active` for active and synthetic
/// states and for idle-with-hook.
fn receipt_verdict_for_zombie(zombie: &ZombieResult) -> PatrolVerdict {
    if zombie.was_active {
        PatrolVerdict::Stale
    } else {
        PatrolVerdict::Orphan
    }
}

pub fn build_patrol_receipt(rig: &str, zombie: ZombieResult) -> PatrolReceipt {
    PatrolReceipt {
        rig: rig.to_string(),
        polecat: zombie.polecat_name.clone(),
        verdict: receipt_verdict_for_zombie(&zombie),
        recommended_action: zombie.action.clone(),
        evidence: PatrolEvidence {
            agent_state: zombie.agent_state,
            hook_bead: zombie.hook_bead,
            error: zombie.error.map(|e| e.to_string()).unwrap_or_default(),
        },
    }
}

/// Receipts for a whole detection result, in detection order. Empty input
/// yields no receipts.
pub fn build_patrol_receipts(
    rig: &str,
    result: Option<&DetectZombiePolecatsResult>,
) -> Vec<PatrolReceipt> {
    let Some(result) = result else {
        return Vec::new();
    };
    result
        .zombies
        .iter()
        .cloned()
        .map(|z| build_patrol_receipt(rig, z))
        .collect()
}

/// Find the bead currently hooked to a worker, if any.
pub fn find_hook_bead(api: &dyn BeadsApi, polecat_name: &str) -> Option<String> {
    let hooked = api
        .list(&ListOptions {
            status: "hooked".to_string(),
            ..Default::default()
        })
        .ok()?;
    hooked
        .into_iter()
        .find(|issue| issue.assignee == polecat_name)
        .map(|issue| issue.id)
}

/// Scan a rig's worker sessions for zombies.
///
/// A worker whose heartbeat exists but has gone stale is a zombie: the pane
/// is alive, the agent inside it is not doing anything. Sessions without a
/// heartbeat file are left alone: other liveness checks own that case.
pub fn detect_zombie_polecats(
    town: &std::path::Path,
    rig: &str,
    registry: &Registry,
    driver: &dyn SessionDriver,
    api: &dyn BeadsApi,
) -> DetectZombiePolecatsResult {
    let mut result = DetectZombiePolecatsResult::default();

    let sessions = match driver.list_sessions() {
        Ok(sessions) => sessions,
        Err(err) => {
            tracing::warn!(patrol = "witness", rig = %rig, "listing sessions: {err}");
            return result;
        }
    };

    for session in sessions {
        let Some(parsed) = SessionName::parse(&session, registry) else {
            continue;
        };
        if parsed.rig != rig || parsed.role != AgentRole::Polecat {
            continue;
        }

        let (stale, exists) = is_session_heartbeat_stale(town, &session);
        if !exists || !stale {
            continue;
        }

        let hook_bead = find_hook_bead(api, &parsed.name).unwrap_or_default();
        let was_active = !hook_bead.is_empty();
        result.zombies.push(ZombieResult {
            polecat_name: parsed.name.clone(),
            agent_state: if was_active { "working" } else { "idle" }.to_string(),
            hook_bead,
            was_active,
            action: "flagged".to_string(),
            error: None,
        });
    }

    result
}
