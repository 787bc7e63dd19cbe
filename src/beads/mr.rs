//! Branch -> merge-request lookup.
//!
//! A merge-request bead's description begins with `branch: <name>\n`; that
//! first line is the index key.

use super::{BeadsApi, BeadsError, Issue, ListOptions};

/// Find the open merge-request bead for `branch`, if any.
///
/// Enables idempotent submission: when an MR already exists, creation is
/// skipped.
pub fn find_mr_for_branch(
    api: &dyn BeadsApi,
    branch: &str,
) -> Result<Option<Issue>, BeadsError> {
    find(api, branch, true)
}

/// Like [`find_mr_for_branch`] but also matches closed MRs. Recovery checks
/// use this to decide whether work was ever submitted to the merge queue.
pub fn find_mr_for_branch_any(
    api: &dyn BeadsApi,
    branch: &str,
) -> Result<Option<Issue>, BeadsError> {
    find(api, branch, false)
}

fn find(api: &dyn BeadsApi, branch: &str, skip_closed: bool) -> Result<Option<Issue>, BeadsError> {
    let branch_prefix = format!("branch: {branch}\n");

    let issues = api.list(&ListOptions {
        status: "all".to_string(),
        label: "gt:merge-request".to_string(),
        ..Default::default()
    })?;

    for issue in issues {
        if skip_closed && issue.is_closed() {
            continue;
        }
        if issue.description.starts_with(&branch_prefix) {
            return Ok(Some(issue));
        }
    }
    Ok(None)
}
