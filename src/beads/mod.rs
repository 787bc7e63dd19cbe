//! Typed client for the bead store.
//!
//! The store itself is external: a `bd` binary fronting the versioned SQL
//! server. This module wraps it as a typed API, classifying failures by exit
//! code and stderr shape: never by parsing free-form stdout for control
//! flow. Components depend on the [`BeadsApi`] trait so tests can substitute
//! an in-memory fake.

mod issue;
mod mr;
mod routes;

pub use issue::{
    AttachmentFields, Issue, is_flag_like_title, needs_force_for_id, parse_attachment_fields,
};
pub use mr::{find_mr_for_branch, find_mr_for_branch_any};
pub use routes::{PrefixRegistry, Route, load_routes};

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

use crate::Transience;

#[derive(Debug, Error)]
pub enum BeadsError {
    #[error("issue {id} not found")]
    NotFound { id: String },

    #[error("bd {verb} failed ({status}): {stderr}")]
    CommandFailed {
        verb: String,
        status: i32,
        stderr: String,
    },

    #[error("failed to launch bd: {0}")]
    Launch(#[from] std::io::Error),

    #[error("failed to parse bd output: {0}")]
    Parse(#[from] serde_json::Error),
}

impl BeadsError {
    pub fn transience(&self) -> Transience {
        match self {
            BeadsError::NotFound { .. } => Transience::Permanent,
            BeadsError::CommandFailed { .. } => Transience::Unknown,
            BeadsError::Launch(_) => Transience::Retryable,
            BeadsError::Parse(_) => Transience::Permanent,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BeadsError::NotFound { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// "open", "closed", or "all" (empty = store default, open).
    pub status: String,
    pub issue_type: String,
    pub label: String,
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Explicit id (requires force); empty = store-assigned.
    pub id: String,
    pub title: String,
    pub issue_type: String,
    pub description: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub status: Option<String>,
    pub description: Option<String>,
    pub assignee: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DepDirection {
    Up,
    Down,
}

impl DepDirection {
    fn as_flag(&self) -> &'static str {
        match self {
            DepDirection::Up => "--direction=up",
            DepDirection::Down => "--direction=down",
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct DepEntry {
    pub id: String,
    #[serde(rename = "issue_type")]
    pub issue_type: String,
    pub status: String,
}

/// The capability seam every store consumer depends on.
pub trait BeadsApi: Send + Sync {
    fn show(&self, id: &str) -> Result<Issue, BeadsError>;
    fn list(&self, opts: &ListOptions) -> Result<Vec<Issue>, BeadsError>;
    fn create(&self, opts: &CreateOptions) -> Result<Issue, BeadsError>;
    fn update(&self, id: &str, opts: &UpdateOptions) -> Result<(), BeadsError>;
    fn close(&self, id: &str, reason: &str) -> Result<(), BeadsError>;
    fn dep_add(&self, from: &str, to: &str, dep_type: &str) -> Result<(), BeadsError>;
    fn dep_list(
        &self,
        id: &str,
        direction: DepDirection,
        dep_type: &str,
    ) -> Result<Vec<DepEntry>, BeadsError>;
    fn label_add(&self, id: &str, label: &str) -> Result<(), BeadsError>;
    fn label_remove(&self, id: &str, label: &str) -> Result<(), BeadsError>;
}

/// Subprocess-backed client.
#[derive(Debug, Clone)]
pub struct Beads {
    dir: PathBuf,
    /// Force the store's auto-commit on for every statement, even when the
    /// surrounding process has turned it off globally. Convoy writes must be
    /// durable immediately.
    force_auto_commit: bool,
}

impl Beads {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            force_auto_commit: false,
        }
    }

    /// A copy of this client that pins `BD_DOLT_AUTO_COMMIT=on`.
    pub fn with_auto_commit(&self) -> Self {
        Self {
            dir: self.dir.clone(),
            force_auto_commit: true,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn run(&self, verb: &str, args: &[String]) -> Result<Vec<u8>, BeadsError> {
        let mut cmd = Command::new("bd");
        cmd.args(args).current_dir(&self.dir);
        if self.force_auto_commit {
            cmd.env("BD_DOLT_AUTO_COMMIT", "on");
        }
        let output = cmd.output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(BeadsError::CommandFailed {
                verb: verb.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr,
            });
        }
        Ok(output.stdout)
    }

    fn classify_show_failure(err: BeadsError, id: &str) -> BeadsError {
        if let BeadsError::CommandFailed { ref stderr, .. } = err
            && is_not_found_stderr(stderr)
        {
            return BeadsError::NotFound { id: id.to_string() };
        }
        err
    }
}

/// `bd show` reports missing issues on stderr in a few historical shapes.
fn is_not_found_stderr(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("not found") || lower.contains("no issue found")
}

impl BeadsApi for Beads {
    fn show(&self, id: &str) -> Result<Issue, BeadsError> {
        let args = vec!["show".to_string(), id.to_string(), "--json".to_string()];
        let out = self
            .run("show", &args)
            .map_err(|e| Self::classify_show_failure(e, id))?;
        // bd show renders a one-element array.
        let mut issues: Vec<Issue> = serde_json::from_slice(&out)?;
        issues.pop().ok_or_else(|| BeadsError::NotFound {
            id: id.to_string(),
        })
    }

    fn list(&self, opts: &ListOptions) -> Result<Vec<Issue>, BeadsError> {
        let mut args = vec!["list".to_string()];
        if !opts.issue_type.is_empty() {
            args.push(format!("--type={}", opts.issue_type));
        }
        if !opts.status.is_empty() {
            args.push(format!("--status={}", opts.status));
        }
        if !opts.label.is_empty() {
            args.push(format!("--label={}", opts.label));
        }
        args.push("--json".to_string());
        let out = self.run("list", &args)?;
        Ok(serde_json::from_slice(&out)?)
    }

    fn create(&self, opts: &CreateOptions) -> Result<Issue, BeadsError> {
        let mut args = vec!["create".to_string()];
        if !opts.issue_type.is_empty() {
            args.push(format!("--type={}", opts.issue_type));
        }
        if !opts.id.is_empty() {
            args.push(format!("--id={}", opts.id));
            if needs_force_for_id(&opts.id) {
                args.push("--force".to_string());
            }
        }
        args.push(format!("--title={}", opts.title));
        if !opts.description.is_empty() {
            args.push(format!("--description={}", opts.description));
        }
        if !opts.labels.is_empty() {
            args.push(format!("--labels={}", opts.labels.join(",")));
        }
        args.push("--json".to_string());
        let out = self.run("create", &args)?;
        // bd create renders the created issue (object or one-element array).
        match serde_json::from_slice::<Issue>(&out) {
            Ok(issue) => Ok(issue),
            Err(_) => {
                let mut issues: Vec<Issue> = serde_json::from_slice(&out)?;
                issues.pop().ok_or_else(|| BeadsError::NotFound {
                    id: opts.id.clone(),
                })
            }
        }
    }

    fn update(&self, id: &str, opts: &UpdateOptions) -> Result<(), BeadsError> {
        let mut args = vec!["update".to_string(), id.to_string()];
        if let Some(status) = &opts.status {
            args.push(format!("--status={status}"));
        }
        if let Some(description) = &opts.description {
            args.push(format!("--description={description}"));
        }
        if let Some(assignee) = &opts.assignee {
            args.push(format!("--assignee={assignee}"));
        }
        self.run("update", &args)
            .map_err(|e| Self::classify_show_failure(e, id))?;
        Ok(())
    }

    fn close(&self, id: &str, reason: &str) -> Result<(), BeadsError> {
        let mut args = vec!["close".to_string(), id.to_string()];
        if !reason.is_empty() {
            args.push("-r".to_string());
            args.push(reason.to_string());
        }
        self.run("close", &args)
            .map_err(|e| Self::classify_show_failure(e, id))?;
        Ok(())
    }

    fn dep_add(&self, from: &str, to: &str, dep_type: &str) -> Result<(), BeadsError> {
        let args = vec![
            "dep".to_string(),
            "add".to_string(),
            from.to_string(),
            to.to_string(),
            format!("--type={dep_type}"),
        ];
        self.run("dep add", &args)?;
        Ok(())
    }

    fn dep_list(
        &self,
        id: &str,
        direction: DepDirection,
        dep_type: &str,
    ) -> Result<Vec<DepEntry>, BeadsError> {
        let args = vec![
            "dep".to_string(),
            "list".to_string(),
            id.to_string(),
            direction.as_flag().to_string(),
            format!("--type={dep_type}"),
            "--json".to_string(),
        ];
        let out = self.run("dep list", &args)?;
        Ok(serde_json::from_slice(&out)?)
    }

    fn label_add(&self, id: &str, label: &str) -> Result<(), BeadsError> {
        let args = vec![
            "label".to_string(),
            "add".to_string(),
            id.to_string(),
            label.to_string(),
        ];
        self.run("label add", &args)
            .map_err(|e| Self::classify_show_failure(e, id))?;
        Ok(())
    }

    fn label_remove(&self, id: &str, label: &str) -> Result<(), BeadsError> {
        let args = vec![
            "label".to_string(),
            "remove".to_string(),
            id.to_string(),
            label.to_string(),
        ];
        self.run("label remove", &args)
            .map_err(|e| Self::classify_show_failure(e, id))?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory fake store for unit tests.

    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct FakeBeads {
        pub issues: Mutex<BTreeMap<String, Issue>>,
        /// (from, to, dep_type)
        pub deps: Mutex<Vec<(String, String, String)>>,
        /// Ids for which dep_add must fail.
        pub fail_dep_add_for: Mutex<Vec<String>>,
        pub next_id: Mutex<u64>,
    }

    impl FakeBeads {
        pub fn with_issue(self, issue: Issue) -> Self {
            self.issues
                .lock()
                .unwrap()
                .insert(issue.id.clone(), issue);
            self
        }

        pub fn insert(&self, issue: Issue) {
            self.issues
                .lock()
                .unwrap()
                .insert(issue.id.clone(), issue);
        }
    }

    impl BeadsApi for FakeBeads {
        fn show(&self, id: &str) -> Result<Issue, BeadsError> {
            self.issues
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| BeadsError::NotFound { id: id.to_string() })
        }

        fn list(&self, opts: &ListOptions) -> Result<Vec<Issue>, BeadsError> {
            let issues = self.issues.lock().unwrap();
            Ok(issues
                .values()
                .filter(|i| opts.issue_type.is_empty() || i.issue_type == opts.issue_type)
                .filter(|i| {
                    opts.status.is_empty() || opts.status == "all" || i.status == opts.status
                })
                .filter(|i| opts.label.is_empty() || i.has_label(&opts.label))
                .cloned()
                .collect())
        }

        fn create(&self, opts: &CreateOptions) -> Result<Issue, BeadsError> {
            let id = if opts.id.is_empty() {
                let mut next = self.next_id.lock().unwrap();
                *next += 1;
                format!("fk-{next}")
            } else {
                opts.id.clone()
            };
            let issue = Issue {
                id: id.clone(),
                title: opts.title.clone(),
                issue_type: opts.issue_type.clone(),
                status: "open".to_string(),
                description: opts.description.clone(),
                labels: opts.labels.clone(),
                ..Default::default()
            };
            self.insert(issue.clone());
            Ok(issue)
        }

        fn update(&self, id: &str, opts: &UpdateOptions) -> Result<(), BeadsError> {
            let mut issues = self.issues.lock().unwrap();
            let issue = issues
                .get_mut(id)
                .ok_or_else(|| BeadsError::NotFound { id: id.to_string() })?;
            if let Some(status) = &opts.status {
                issue.status = status.clone();
            }
            if let Some(description) = &opts.description {
                issue.description = description.clone();
            }
            if let Some(assignee) = &opts.assignee {
                issue.assignee = assignee.clone();
            }
            Ok(())
        }

        fn close(&self, id: &str, _reason: &str) -> Result<(), BeadsError> {
            self.update(
                id,
                &UpdateOptions {
                    status: Some("closed".to_string()),
                    ..Default::default()
                },
            )
        }

        fn dep_add(&self, from: &str, to: &str, dep_type: &str) -> Result<(), BeadsError> {
            if self
                .fail_dep_add_for
                .lock()
                .unwrap()
                .iter()
                .any(|id| id == to)
            {
                return Err(BeadsError::CommandFailed {
                    verb: "dep add".to_string(),
                    status: 1,
                    stderr: format!("cannot resolve {to}"),
                });
            }
            self.deps.lock().unwrap().push((
                from.to_string(),
                to.to_string(),
                dep_type.to_string(),
            ));
            Ok(())
        }

        fn dep_list(
            &self,
            id: &str,
            direction: DepDirection,
            dep_type: &str,
        ) -> Result<Vec<DepEntry>, BeadsError> {
            let deps = self.deps.lock().unwrap();
            let issues = self.issues.lock().unwrap();
            let mut out = Vec::new();
            for (from, to, kind) in deps.iter() {
                if kind != dep_type {
                    continue;
                }
                let other = match direction {
                    // Upward: who depends on `id`.
                    DepDirection::Up if to == id => from,
                    // Downward: what `id` depends on.
                    DepDirection::Down if from == id => to,
                    _ => continue,
                };
                let (issue_type, status) = issues
                    .get(other)
                    .map(|i| (i.issue_type.clone(), i.status.clone()))
                    .unwrap_or_default();
                out.push(DepEntry {
                    id: other.clone(),
                    issue_type,
                    status,
                });
            }
            Ok(out)
        }

        fn label_add(&self, id: &str, label: &str) -> Result<(), BeadsError> {
            let mut issues = self.issues.lock().unwrap();
            let issue = issues
                .get_mut(id)
                .ok_or_else(|| BeadsError::NotFound { id: id.to_string() })?;
            if !issue.labels.iter().any(|l| l == label) {
                issue.labels.push(label.to_string());
            }
            Ok(())
        }

        fn label_remove(&self, id: &str, label: &str) -> Result<(), BeadsError> {
            let mut issues = self.issues.lock().unwrap();
            let issue = issues
                .get_mut(id)
                .ok_or_else(|| BeadsError::NotFound { id: id.to_string() })?;
            issue.labels.retain(|l| l != label);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_stderr_shapes() {
        assert!(is_not_found_stderr("Issue not found: gt-x"));
        assert!(is_not_found_stderr("error: no issue found"));
        assert!(is_not_found_stderr("gt-x not found"));
        assert!(!is_not_found_stderr("connection refused"));
    }

    #[test]
    fn launch_failure_is_retryable() {
        let err = BeadsError::Launch(std::io::Error::other("boom"));
        assert!(err.transience().is_retryable());
    }
}
