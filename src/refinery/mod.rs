//! Refinery: the merge queue over merge-request beads.
//!
//! An MR bead's description is a small field block (`branch:`,
//! `source_issue:`, `worker:`, `target:`). The refinery scans open MRs,
//! pairs them with their source issues, and after a successful merge closes
//! both ends of the pair.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::beads::{BeadsApi, BeadsError, Issue, ListOptions};

#[derive(Debug, Error)]
pub enum RefineryError {
    #[error("merge request {0} not found in queue (closed or missing)")]
    NotInQueue(String),

    #[error(transparent)]
    Beads(#[from] BeadsError),
}

/// Fields parsed from a merge-request bead description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub id: String,
    pub branch: String,
    pub source_issue: String,
    pub worker: String,
    pub target: String,
}

impl MergeRequest {
    /// Parse the MR field block. The branch line is the index key and comes
    /// first; the rest may appear in any order.
    pub fn parse(issue: &Issue) -> Self {
        let mut mr = MergeRequest {
            id: issue.id.clone(),
            ..Default::default()
        };
        for line in issue.description.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                "branch" => mr.branch = value,
                "source_issue" => mr.source_issue = value,
                "worker" => mr.worker = value,
                "target" => mr.target = value,
                _ => {}
            }
        }
        mr
    }
}

/// One entry in the refinery's work queue.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub mr: MergeRequest,
    pub source_issue: Option<Issue>,
    pub score: i64,
}

/// Outcome of the post-merge closure cascade.
#[derive(Debug, Clone, Default)]
pub struct PostMergeResult {
    pub mr_closed: bool,
    pub source_issue_closed: bool,
    pub source_issue_id: String,
    pub mr: MergeRequest,
}

/// Queue ordering: higher score first, id as the deterministic tie-break so
/// two refinery instances always agree on the next item.
pub fn compare_scored_issues(a: &QueueItem, b: &QueueItem) -> std::cmp::Ordering {
    b.score.cmp(&a.score).then_with(|| a.mr.id.cmp(&b.mr.id))
}

/// Build the merge queue: open merge-request beads paired with their source
/// issues. Closed MRs never appear.
pub fn queue(api: &dyn BeadsApi) -> Result<Vec<QueueItem>, RefineryError> {
    let issues = api.list(&ListOptions {
        issue_type: "merge-request".to_string(),
        status: "all".to_string(),
        ..Default::default()
    })?;

    let mut items = Vec::new();
    for issue in issues {
        if issue.is_closed() {
            continue;
        }
        let mr = MergeRequest::parse(&issue);
        let source_issue = if mr.source_issue.is_empty() {
            None
        } else {
            api.show(&mr.source_issue).ok()
        };
        // Older work merges first.
        let score = -issue.priority;
        items.push(QueueItem {
            mr,
            source_issue,
            score,
        });
    }
    items.sort_by(compare_scored_issues);
    Ok(items)
}

/// Close out a merged MR: the MR bead itself and, when one is recorded, its
/// source issue. The source issue being already gone is not an error: the
/// cascade is idempotent on that side.
pub fn post_merge(api: &dyn BeadsApi, mr_id: &str) -> Result<PostMergeResult, RefineryError> {
    let issue = api
        .show(mr_id)
        .map_err(|e| match e {
            BeadsError::NotFound { .. } => RefineryError::NotInQueue(mr_id.to_string()),
            other => RefineryError::Beads(other),
        })?;
    if issue.is_closed() {
        return Err(RefineryError::NotInQueue(mr_id.to_string()));
    }

    let mr = MergeRequest::parse(&issue);
    let mut result = PostMergeResult {
        source_issue_id: mr.source_issue.clone(),
        mr,
        ..Default::default()
    };

    api.close(mr_id, "merged")?;
    result.mr_closed = true;

    if !result.source_issue_id.is_empty() {
        match api.close(&result.source_issue_id, "merged via refinery") {
            Ok(()) => result.source_issue_closed = true,
            Err(err) if err.is_not_found() => {
                tracing::debug!(mr = %mr_id, source = %result.source_issue_id, "source issue already gone");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(result)
}

/// One refinery patrol pass: log the queue state. The merges themselves run
/// in the refinery agent session; the patrol keeps the queue observable and
/// catches a wedged refinery early.
pub fn run_refinery_patrol(api: &dyn BeadsApi) {
    match queue(api) {
        Ok(items) => {
            tracing::info!(patrol = "refinery", queue_depth = items.len(), "merge queue scanned");
            for item in &items {
                tracing::debug!(
                    patrol = "refinery",
                    mr = %item.mr.id,
                    branch = %item.mr.branch,
                    source = %item.mr.source_issue,
                    "queued merge request"
                );
            }
        }
        Err(err) => {
            tracing::warn!(patrol = "refinery", "queue scan failed: {err}");
        }
    }
}
