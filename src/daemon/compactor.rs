//! Compactor patrol: rebase-squash then gc when history grows too deep.

use crate::config::DaemonPatrolConfig;
use crate::daemon::patrol::compactor_threshold;
use crate::dolt::DoltClient;

/// Commits to keep un-squashed during compaction.
const COMPACT_KEEP_RECENT: u64 = 100;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompactorReport {
    pub checked: usize,
    pub compacted: Vec<String>,
    pub failed: Vec<String>,
}

/// One compactor pass.
///
/// For each database at or over the commit threshold: rebase-squash old
/// history, then gc. Gc without the rebase reclaims nothing, so the pair is
/// a single unit. A failure leaves that database untouched; the next run
/// starts the compaction over from the beginning rather than resuming a
/// half-finished one.
pub fn run_compactor_dog(
    config: Option<&DaemonPatrolConfig>,
    dolt: &DoltClient,
) -> CompactorReport {
    run_with_threshold(dolt, compactor_threshold(config))
}

/// Standalone entry (`gt maintain`): caller-supplied threshold, `--force`
/// skips the count check entirely.
pub fn run_maintain(dolt: &DoltClient, threshold: u64, force: bool) -> CompactorReport {
    if force {
        compact_all(dolt)
    } else {
        run_with_threshold(dolt, threshold)
    }
}

fn run_with_threshold(dolt: &DoltClient, threshold: u64) -> CompactorReport {
    let mut report = CompactorReport::default();
    let databases = match dolt.list_databases() {
        Ok(databases) => databases,
        Err(err) => {
            tracing::warn!(patrol = "compactor_dog", "listing databases: {err}");
            return report;
        }
    };

    for db in databases {
        report.checked += 1;
        let commits = match dolt.commit_count(&db) {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!(patrol = "compactor_dog", db = %db, "counting commits: {err}");
                continue;
            }
        };
        if commits < threshold {
            tracing::debug!(patrol = "compactor_dog", db = %db, commits, threshold, "below threshold");
            continue;
        }
        compact_one(dolt, &db, &mut report);
    }
    report
}

fn compact_all(dolt: &DoltClient) -> CompactorReport {
    let mut report = CompactorReport::default();
    match dolt.list_databases() {
        Ok(databases) => {
            for db in databases {
                report.checked += 1;
                compact_one(dolt, &db, &mut report);
            }
        }
        Err(err) => {
            tracing::warn!(patrol = "compactor_dog", "listing databases: {err}");
        }
    }
    report
}

fn compact_one(dolt: &DoltClient, db: &str, report: &mut CompactorReport) {
    tracing::info!(patrol = "compactor_dog", db = %db, "compacting");
    match dolt.compact(db, COMPACT_KEEP_RECENT) {
        Ok(()) => report.compacted.push(db.to_string()),
        Err(err) => {
            tracing::warn!(patrol = "compactor_dog", db = %db, "compaction failed: {err}");
            report.failed.push(db.to_string());
        }
    }
}
