//! Convoy manager: tracking groups over work beads.
//!
//! A convoy is a bead of type `convoy` that tracks one or more work beads
//! through a typed `tracks` dependency. Ownership and merge strategy are
//! carried on the convoy (source of truth) and stamped onto the tracked
//! bead's attachment record at dispatch time (fast path).

use rand::Rng;
use thiserror::Error;

use crate::Transience;
use crate::beads::{
    BeadsApi, BeadsError, CreateOptions, DepDirection, ListOptions, is_flag_like_title,
    parse_attachment_fields,
};

#[derive(Debug, Error)]
pub enum ConvoyError {
    #[error("refusing to create convoy: bead title {0:?} looks like a CLI flag")]
    FlagLikeTitle(String),

    #[error("no beads to track")]
    NoBeads,

    #[error("creating convoy: {0}")]
    Create(#[source] BeadsError),

    #[error("adding tracking relation for {bead}: {source}")]
    Tracking {
        bead: String,
        #[source]
        source: BeadsError,
    },

    #[error("invalid convoy status {status:?}: valid statuses are {valid}")]
    UnknownStatus { status: String, valid: String },

    #[error("invalid convoy status transition {from:?} -> {to:?}")]
    InvalidTransition { from: String, to: String },

    #[error("{bead} is already tracked by convoy {convoy}")]
    AlreadyTracked { bead: String, convoy: String },

    #[error(transparent)]
    Beads(#[from] BeadsError),
}

impl ConvoyError {
    pub fn transience(&self) -> Transience {
        match self {
            ConvoyError::Beads(e) | ConvoyError::Create(e) => e.transience(),
            ConvoyError::Tracking { source, .. } => source.transience(),
            _ => Transience::Permanent,
        }
    }
}

/// Convoy details for a tracked issue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvoyInfo {
    /// Convoy bead id (e.g. `hq-cv-ab3de`).
    pub id: String,
    /// True when the convoy carries the `gt:owned` label.
    pub owned: bool,
    /// "direct", "mr", "local", or "" (default = mr).
    pub merge_strategy: String,
}

impl ConvoyInfo {
    /// The check that skips the witness/refinery merge pipeline.
    pub fn is_owned_direct(&self) -> bool {
        self.owned && self.merge_strategy == "direct"
    }
}

/// Generate a short random convoy id suffix: 5 lowercase base32 chars from
/// 3 random bytes.
pub fn generate_short_id() -> String {
    let bytes: [u8; 3] = rand::thread_rng().r#gen();
    base32_lower(&bytes)[..5].to_string()
}

/// Mint a fresh convoy id. The `hq-cv-` prefix is registered in routes at
/// install time and gives convoys a distinct visual namespace.
pub fn new_convoy_id() -> String {
    format!("hq-cv-{}", generate_short_id())
}

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

fn base32_lower(input: &[u8]) -> String {
    let mut out = String::new();
    let mut buffer = 0u32;
    let mut bits = 0u32;
    for &byte in input {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

/// Resolve the open convoy tracking `bead_id`, if any.
///
/// Authoritative path: query what tracks this bead (`tracks`, direction up).
/// Fallback for cross-routing gaps: scan open convoys by description, then
/// by their downward tracks deps.
pub fn is_tracked_by_convoy(api: &dyn BeadsApi, bead_id: &str) -> Option<String> {
    if let Ok(trackers) = api.dep_list(bead_id, DepDirection::Up, "tracks") {
        for tracker in trackers {
            if tracker.issue_type == "convoy" && tracker.status == "open" {
                return Some(tracker.id);
            }
        }
    }

    find_convoy_by_description(api, bead_id)
}

/// Scan open convoys for one tracking `bead_id`: description pattern first
/// (auto-created convoys say "tracking <bead>"), then each convoy's tracks
/// deps (manually-created convoys have no such description).
fn find_convoy_by_description(api: &dyn BeadsApi, bead_id: &str) -> Option<String> {
    let convoys = api
        .list(&ListOptions {
            issue_type: "convoy".to_string(),
            status: "open".to_string(),
            ..Default::default()
        })
        .ok()?;

    let tracking_pattern = format!("tracking {bead_id}");
    for convoy in &convoys {
        if convoy.description.contains(&tracking_pattern) {
            return Some(convoy.id.clone());
        }
    }

    for convoy in &convoys {
        if convoy_tracks_bead(api, &convoy.id, bead_id) {
            return Some(convoy.id.clone());
        }
    }

    None
}

/// True when the convoy has a `tracks` dep on `bead_id`, stored either raw
/// or wrapped as `external:<prefix>:<id>`.
fn convoy_tracks_bead(api: &dyn BeadsApi, convoy_id: &str, bead_id: &str) -> bool {
    let Ok(tracked) = api.dep_list(convoy_id, DepDirection::Down, "tracks") else {
        return false;
    };
    tracked.iter().any(|t| {
        t.id == bead_id
            || t.id
                .strip_prefix("external:")
                .and_then(|rest| rest.split_once(':'))
                .is_some_and(|(_, id)| id == bead_id)
    })
}

/// Convoy info for an issue via the slow (cross-routing) path.
///
/// Phantom convoys (tracking dep present but the convoy record gone) are
/// treated as untracked, not as errors.
pub fn convoy_info_for_issue(api: &dyn BeadsApi, issue_id: &str) -> Option<ConvoyInfo> {
    let convoy_id = is_tracked_by_convoy(api, issue_id)?;

    let convoy = match api.show(&convoy_id) {
        Ok(convoy) => convoy,
        Err(err) if err.is_not_found() => {
            tracing::debug!(convoy = %convoy_id, issue = %issue_id, "phantom convoy, treating as untracked");
            return None;
        }
        Err(_) => {
            // Transient failure: return what we know.
            return Some(ConvoyInfo {
                id: convoy_id,
                ..Default::default()
            });
        }
    };

    Some(ConvoyInfo {
        id: convoy_id,
        owned: convoy.has_label("gt:owned"),
        merge_strategy: parse_convoy_merge_strategy(&convoy.description),
    })
}

/// Convoy info straight from the issue's attachment fields (fast path).
///
/// The dispatcher stamps `convoy_id`/`merge_strategy`/`convoy_owned` onto
/// the issue at sling time; reading them back avoids the unreliable
/// cross-rig dep resolution entirely.
pub fn convoy_info_from_issue(api: &dyn BeadsApi, issue_id: &str) -> Option<ConvoyInfo> {
    if issue_id.is_empty() {
        return None;
    }
    let issue = api.show(issue_id).ok()?;
    let attachment = parse_attachment_fields(&issue)?;
    if attachment.convoy_id.is_empty() {
        return None;
    }
    Some(ConvoyInfo {
        id: attachment.convoy_id,
        merge_strategy: attachment.merge_strategy,
        owned: attachment.convoy_owned,
    })
}

/// Parse the merge strategy from a convoy description (`Merge: <s>` line).
pub fn parse_convoy_merge_strategy(description: &str) -> String {
    for line in description.lines() {
        if let Some(value) = line.trim().strip_prefix("Merge:") {
            let value = value.trim();
            if matches!(value, "direct" | "mr" | "local") {
                return value.to_string();
            }
        }
    }
    String::new()
}

/// Create an auto-convoy tracking a single issue.
///
/// If the tracking dep cannot be added the just-created convoy is closed
/// immediately: no orphans. All writes force auto-commit on.
pub fn create_auto_convoy(
    api: &dyn BeadsApi,
    bead_id: &str,
    bead_title: &str,
    owned: bool,
    merge_strategy: &str,
) -> Result<String, ConvoyError> {
    if is_flag_like_title(bead_title) {
        return Err(ConvoyError::FlagLikeTitle(bead_title.to_string()));
    }

    let convoy_id = new_convoy_id();
    let mut description = format!("Auto-created convoy tracking {bead_id}");
    if !merge_strategy.is_empty() {
        description.push_str(&format!("\nMerge: {merge_strategy}"));
    }

    let mut labels = Vec::new();
    if owned {
        labels.push("gt:owned".to_string());
    }

    api.create(&CreateOptions {
        id: convoy_id.clone(),
        issue_type: "convoy".to_string(),
        title: format!("Work: {bead_title}"),
        description,
        labels,
    })
    .map_err(ConvoyError::Create)?;

    if let Err(err) = api.dep_add(&convoy_id, bead_id, "tracks") {
        // Tracking failed; close the orphan before reporting.
        let _ = api.close(&convoy_id, "tracking dep failed");
        return Err(ConvoyError::Tracking {
            bead: bead_id.to_string(),
            source: err,
        });
    }

    Ok(convoy_id)
}

/// Create one convoy tracking a whole batch.
///
/// Returns the convoy id and the subset of beads whose tracking dep was
/// added. Partial tracking is better than none: failures are logged and the
/// bead is left out of the returned set so callers never stamp a convoy the
/// convoy does not know about.
pub fn create_batch_convoy(
    api: &dyn BeadsApi,
    bead_ids: &[String],
    rig_name: &str,
    owned: bool,
    merge_strategy: &str,
) -> Result<(String, Vec<String>), ConvoyError> {
    if bead_ids.is_empty() {
        return Err(ConvoyError::NoBeads);
    }

    let convoy_id = new_convoy_id();
    let mut description = format!("Auto-created convoy tracking {} beads", bead_ids.len());
    if !merge_strategy.is_empty() {
        description.push_str(&format!("\nMerge: {merge_strategy}"));
    }

    let mut labels = Vec::new();
    if owned {
        labels.push("gt:owned".to_string());
    }

    api.create(&CreateOptions {
        id: convoy_id.clone(),
        issue_type: "convoy".to_string(),
        title: format!("Batch: {} beads to {rig_name}", bead_ids.len()),
        description,
        labels,
    })
    .map_err(ConvoyError::Create)?;

    let mut tracked = Vec::new();
    for bead_id in bead_ids {
        match api.dep_add(&convoy_id, bead_id, "tracks") {
            Ok(()) => tracked.push(bead_id.clone()),
            Err(err) => {
                tracing::warn!(convoy = %convoy_id, bead = %bead_id, "could not track bead in convoy: {err}");
            }
        }
    }

    Ok((convoy_id, tracked))
}

/// Issues tracked by a convoy, resolved through its downward `tracks` deps.
pub fn tracked_issues(api: &dyn BeadsApi, convoy_id: &str) -> Vec<crate::beads::Issue> {
    let Ok(deps) = api.dep_list(convoy_id, DepDirection::Down, "tracks") else {
        return Vec::new();
    };
    deps.iter()
        .filter_map(|dep| {
            let id = dep
                .id
                .strip_prefix("external:")
                .and_then(|rest| rest.split_once(':'))
                .map(|(_, id)| id)
                .unwrap_or(&dep.id);
            api.show(id).ok()
        })
        .collect()
}

/// Detailed report for a bead that is already tracked by another convoy:
/// the convoy's members with status markers, and the operator's options.
pub fn conflict_report(api: &dyn BeadsApi, bead_id: &str, convoy_id: &str) -> String {
    let mut out = String::new();

    let title = api
        .show(convoy_id)
        .map(|c| c.title)
        .unwrap_or_default();
    out.push_str(&format!(
        "Conflict: {bead_id} is already tracked by convoy {convoy_id}"
    ));
    if !title.is_empty() {
        out.push_str(&format!(" ({title})"));
    }
    out.push('\n');

    let tracked = tracked_issues(api, convoy_id);
    if !tracked.is_empty() {
        out.push_str(&format!("\nBeads in convoy {convoy_id}:\n"));
        for issue in &tracked {
            let marker = if issue.id == bead_id { ">" } else { " " };
            let status_icon = match issue.status.as_str() {
                "open" => "*",
                "closed" => "x",
                "hooked" | "pinned" => "#",
                _ => "o",
            };
            let title = if issue.title.is_empty() {
                "(no title)"
            } else {
                &issue.title
            };
            let suffix = if issue.id == bead_id { "  <- conflict" } else { "" };
            out.push_str(&format!(
                "  {marker} {status_icon} {}  {title} [{}]{suffix}\n",
                issue.id, issue.status
            ));
        }
    }

    out.push_str(&format!(
        "\nOptions:\n\
         \x20 1. Sling the other beads without {bead_id}\n\
         \x20 2. Remove it from the existing convoy first:\n\
         \x20      bd dep remove {convoy_id} {bead_id} --type=tracks\n\
         \x20 3. Close the existing convoy and re-sling everything:\n\
         \x20      gt convoy close {convoy_id} --reason \"re-batching\"\n\
         \x20 4. Add the other beads to the existing convoy instead:\n\
         \x20      gt convoy create {bead_id} ...\n"
    ));
    out
}

const VALID_STATUSES: &[&str] = &["open", "closed", "staged:ready", "staged:warnings"];

/// Normalize and validate a convoy status value.
pub fn ensure_known_convoy_status(status: &str) -> Result<String, ConvoyError> {
    let normalized = status.trim().to_lowercase();
    if VALID_STATUSES.contains(&normalized.as_str()) {
        Ok(normalized)
    } else {
        Err(ConvoyError::UnknownStatus {
            status: status.to_string(),
            valid: VALID_STATUSES.join(", "),
        })
    }
}

/// Validate a convoy status transition.
///
/// Staging is an entry state: `open`/`closed` never move back to `staged:*`,
/// while staged convoys may launch (`open`), cancel (`closed`), or re-stage.
pub fn validate_convoy_status_transition(current: &str, target: &str) -> Result<(), ConvoyError> {
    let current = ensure_known_convoy_status(current)?;
    let target = ensure_known_convoy_status(target)?;

    let target_staged = target.starts_with("staged:");
    let current_staged = current.starts_with("staged:");

    if target_staged && !current_staged {
        return Err(ConvoyError::InvalidTransition {
            from: current,
            to: target,
        });
    }
    Ok(())
}
