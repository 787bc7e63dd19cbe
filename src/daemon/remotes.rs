//! Dolt remotes patrol: best-effort push of every database.

use crate::dolt::DoltClient;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RemotesReport {
    pub pushed: Vec<String>,
    pub failed: Vec<String>,
}

/// Push each database's configured remotes. Failures are logged and
/// tolerated; remote outages must not disturb the daemon.
pub fn run_dolt_remotes(dolt: &DoltClient) -> RemotesReport {
    let mut report = RemotesReport::default();
    let databases = match dolt.list_databases() {
        Ok(databases) => databases,
        Err(err) => {
            tracing::warn!(patrol = "dolt_remotes", "listing databases: {err}");
            return report;
        }
    };

    for db in databases {
        match dolt.push_remotes(&db) {
            Ok(()) => report.pushed.push(db),
            Err(err) => {
                tracing::debug!(patrol = "dolt_remotes", db = %db, "push failed: {err}");
                report.failed.push(db);
            }
        }
    }
    report
}
