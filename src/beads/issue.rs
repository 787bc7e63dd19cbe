//! Bead (issue) model as produced by `bd --json`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Issue {
    pub id: String,
    pub title: String,
    #[serde(rename = "issue_type")]
    pub issue_type: String,
    pub status: String,
    pub priority: i64,
    pub assignee: String,
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub description: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Issue {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn is_closed(&self) -> bool {
        self.status == "closed"
    }
}

/// Structured fields stamped onto a work bead's description at dispatch time.
///
/// These are the fast path for convoy resolution: the dispatcher writes them
/// so later readers can skip the cross-rig dependency query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttachmentFields {
    pub convoy_id: String,
    pub merge_strategy: String,
    pub convoy_owned: bool,
}

impl AttachmentFields {
    /// Render as description lines (appended after the existing text).
    pub fn format(&self) -> String {
        let mut out = String::new();
        if !self.convoy_id.is_empty() {
            out.push_str(&format!("convoy_id: {}\n", self.convoy_id));
        }
        if !self.merge_strategy.is_empty() {
            out.push_str(&format!("merge_strategy: {}\n", self.merge_strategy));
        }
        if self.convoy_owned {
            out.push_str("convoy_owned: true\n");
        }
        out
    }
}

/// Parse attachment fields out of an issue description.
///
/// Returns `None` when no attachment line is present.
pub fn parse_attachment_fields(issue: &Issue) -> Option<AttachmentFields> {
    let mut fields = AttachmentFields::default();
    let mut found = false;
    for line in issue.description.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "convoy_id" => {
                fields.convoy_id = value.to_string();
                found = true;
            }
            "merge_strategy" => {
                fields.merge_strategy = value.to_string();
                found = true;
            }
            "convoy_owned" => {
                fields.convoy_owned = value == "true";
                found = true;
            }
            _ => {}
        }
    }
    found.then_some(fields)
}

/// Guard against titles that would be swallowed as CLI flags when the id or
/// title is forwarded to subprocess tooling.
pub fn is_flag_like_title(title: &str) -> bool {
    let trimmed = title.trim_start();
    trimmed.starts_with('-')
}

/// Ids that carry a non-standard prefix (anything but the rig's own) need
/// `--force` on create so `bd` accepts them.
pub fn needs_force_for_id(id: &str) -> bool {
    // Convoy ids are minted on the hq route; bd requires force for
    // explicitly-supplied ids.
    !id.is_empty()
}
