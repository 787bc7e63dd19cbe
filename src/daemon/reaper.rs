//! Wisp reaper patrol: purge ephemeral state and auto-close stale issues.

use std::path::Path;
use std::time::Duration;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::beads::{BeadsApi, ListOptions, UpdateOptions};
use crate::config::DaemonPatrolConfig;
use crate::daemon::patrol::{stale_issue_age, wisp_delete_age, wisp_reaper_max_age};
use crate::dolt::DoltClient;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReaperReport {
    pub databases_swept: usize,
    pub issues_closed: usize,
}

/// One reaper pass over every database plus the issue store.
pub fn run_wisp_reaper(
    _town: &Path,
    config: Option<&DaemonPatrolConfig>,
    dolt: &DoltClient,
    beads: &dyn BeadsApi,
) -> ReaperReport {
    let mut report = ReaperReport::default();

    let max_age = wisp_reaper_max_age(config);
    let delete_age = wisp_delete_age(config);

    match dolt.list_databases() {
        Ok(databases) => {
            for db in databases {
                // Ephemeral wisps age out fast; long-lived wisps get a far
                // longer leash before deletion.
                let sweep = format!(
                    "DELETE FROM wisps WHERE ephemeral = 1 AND updated_at < NOW() - INTERVAL {} SECOND",
                    max_age.as_secs()
                );
                let purge = format!(
                    "DELETE FROM wisps WHERE updated_at < NOW() - INTERVAL {} SECOND",
                    delete_age.as_secs()
                );
                match dolt.sql(&db, &sweep).and_then(|_| dolt.sql(&db, &purge)) {
                    Ok(_) => report.databases_swept += 1,
                    Err(err) => {
                        tracing::debug!(patrol = "wisp_reaper", db = %db, "sweep failed: {err}");
                    }
                }
            }
        }
        Err(err) => {
            tracing::warn!(patrol = "wisp_reaper", "listing databases: {err}");
        }
    }

    report.issues_closed = close_stale_issues(beads, stale_issue_age(config));
    report
}

/// Close open issues untouched for longer than `age`.
pub fn close_stale_issues(beads: &dyn BeadsApi, age: Duration) -> usize {
    let issues = match beads.list(&ListOptions {
        status: "open".to_string(),
        ..Default::default()
    }) {
        Ok(issues) => issues,
        Err(err) => {
            tracing::warn!(patrol = "wisp_reaper", "listing open issues: {err}");
            return 0;
        }
    };

    let now = OffsetDateTime::now_utc();
    let mut closed = 0;
    for issue in issues {
        let Ok(updated) = OffsetDateTime::parse(&issue.updated_at, &Rfc3339) else {
            continue;
        };
        if now - updated < age {
            continue;
        }
        match beads.update(
            &issue.id,
            &UpdateOptions {
                status: Some("closed".to_string()),
                ..Default::default()
            },
        ) {
            Ok(()) => {
                tracing::info!(patrol = "wisp_reaper", issue = %issue.id, "auto-closed stale issue");
                closed += 1;
            }
            Err(err) => {
                tracing::warn!(patrol = "wisp_reaper", issue = %issue.id, "close failed: {err}");
            }
        }
    }
    closed
}
