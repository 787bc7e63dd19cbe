//! Session heartbeats: fresh/stale liveness signals independent of OS PIDs.
//!
//! Worker sessions touch their heartbeat through frequent tooling commands.
//! The 3-minute threshold leaves ample margin between commands while
//! detecting dead sessions quickly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub const HEARTBEAT_STALE_THRESHOLD: Duration = Duration::from_secs(3 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHeartbeat {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

fn heartbeat_file(town: &Path, session: &str) -> PathBuf {
    crate::paths::heartbeats_dir(town).join(format!("{session}.json"))
}

/// Write or refresh the heartbeat for a session.
///
/// Best-effort: heartbeat signals are non-critical and must never block or
/// fail the calling command.
pub fn touch_session_heartbeat(town: &Path, session: &str) {
    let dir = crate::paths::heartbeats_dir(town);
    if std::fs::create_dir_all(&dir).is_err() {
        return;
    }
    let hb = SessionHeartbeat {
        timestamp: OffsetDateTime::now_utc(),
    };
    if let Ok(data) = serde_json::to_vec(&hb) {
        let _ = std::fs::write(heartbeat_file(town, session), data);
    }
}

/// Read a session's heartbeat; `None` when absent or unreadable.
pub fn read_session_heartbeat(town: &Path, session: &str) -> Option<SessionHeartbeat> {
    let data = std::fs::read(heartbeat_file(town, session)).ok()?;
    serde_json::from_slice(&data).ok()
}

/// Staleness check: `(stale, exists)`.
///
/// A missing heartbeat reports `(false, false)`: absence is not staleness,
/// because sessions may predate heartbeat support. Callers fall back to
/// other liveness signals in that case.
pub fn is_session_heartbeat_stale(town: &Path, session: &str) -> (bool, bool) {
    let Some(hb) = read_session_heartbeat(town, session) else {
        return (false, false);
    };
    let age = OffsetDateTime::now_utc() - hb.timestamp;
    (age >= HEARTBEAT_STALE_THRESHOLD, true)
}

/// Remove a session's heartbeat during cleanup.
pub fn remove_session_heartbeat(town: &Path, session: &str) {
    let _ = std::fs::remove_file(heartbeat_file(town, session));
}

/// Raw RFC 3339 parse helper for heartbeat files written by other tools.
pub fn parse_heartbeat_timestamp(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).ok()
}
