//! Queue dispatch parameters embedded in a bead's description.
//!
//! The block is delimited by `---queue---` so it can be parsed and stripped
//! without disturbing the human-written description above it.

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const QUEUE_DELIMITER: &str = "---queue---";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueMetadata {
    pub target_rig: String,
    pub formula: String,
    pub args: String,
    /// Comma-separated key=value pairs.
    pub vars: String,
    pub enqueued_at: String,
    pub merge: String,
    pub convoy: String,
    pub base_branch: String,
    pub no_merge: bool,
    pub account: String,
    pub agent: String,
    pub hook_raw_bead: bool,
    pub no_boot: bool,
    pub owned: bool,
}

impl QueueMetadata {
    /// Metadata stamped with the current UTC timestamp.
    pub fn new(rig_name: &str) -> Self {
        Self {
            target_rig: rig_name.to_string(),
            enqueued_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
            ..Default::default()
        }
    }

    /// Render as key-value lines under the delimiter. Field order is fixed;
    /// empty strings and false booleans are omitted.
    pub fn format(&self) -> String {
        fn push_kv(lines: &mut Vec<String>, key: &str, value: &str) {
            if !value.is_empty() {
                lines.push(format!("{key}: {value}"));
            }
        }
        fn push_flag(lines: &mut Vec<String>, key: &str, value: bool) {
            if value {
                lines.push(format!("{key}: true"));
            }
        }

        let mut lines = vec![QUEUE_DELIMITER.to_string()];
        push_kv(&mut lines, "target_rig", &self.target_rig);
        push_kv(&mut lines, "formula", &self.formula);
        push_kv(&mut lines, "args", &self.args);
        push_kv(&mut lines, "vars", &self.vars);
        push_kv(&mut lines, "enqueued_at", &self.enqueued_at);
        push_kv(&mut lines, "merge", &self.merge);
        push_kv(&mut lines, "convoy", &self.convoy);
        push_kv(&mut lines, "base_branch", &self.base_branch);
        push_flag(&mut lines, "no_merge", self.no_merge);
        push_kv(&mut lines, "account", &self.account);
        push_kv(&mut lines, "agent", &self.agent);
        push_flag(&mut lines, "hook_raw_bead", self.hook_raw_bead);
        push_flag(&mut lines, "no_boot", self.no_boot);
        push_flag(&mut lines, "owned", self.owned);
        lines.join("\n")
    }
}

/// Extract queue metadata from a bead description.
///
/// Returns `None` when no `---queue---` section is present. Unknown keys are
/// tolerated for forward compatibility.
pub fn parse_queue_metadata(description: &str) -> Option<QueueMetadata> {
    let idx = description.find(QUEUE_DELIMITER)?;
    let section = &description[idx + QUEUE_DELIMITER.len()..];

    let mut m = QueueMetadata::default();
    let mut in_block = false;
    for line in section.lines() {
        let line = line.trim();
        if line.is_empty() {
            // The block ends at the first blank line after its entries; the
            // newline right after the delimiter is not one.
            if in_block {
                break;
            }
            continue;
        }
        if line == QUEUE_DELIMITER {
            break;
        }
        in_block = true;
        let Some((key, value)) = line.split_once(": ") else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "target_rig" => m.target_rig = value.to_string(),
            "formula" => m.formula = value.to_string(),
            "args" => m.args = value.to_string(),
            "vars" => m.vars = value.to_string(),
            "enqueued_at" => m.enqueued_at = value.to_string(),
            "merge" => m.merge = value.to_string(),
            "convoy" => m.convoy = value.to_string(),
            "base_branch" => m.base_branch = value.to_string(),
            "no_merge" => m.no_merge = value == "true",
            "account" => m.account = value.to_string(),
            "agent" => m.agent = value.to_string(),
            "hook_raw_bead" => m.hook_raw_bead = value == "true",
            "no_boot" => m.no_boot = value == "true",
            "owned" => m.owned = value == "true",
            _ => {}
        }
    }

    Some(m)
}

/// Remove the `---queue---` section from a description. Inverse of stamping:
/// used when dequeuing a bead for dispatch.
pub fn strip_queue_metadata(description: &str) -> &str {
    match description.find(QUEUE_DELIMITER) {
        Some(idx) => description[..idx].trim_end_matches('\n'),
        None => description,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated() -> QueueMetadata {
        QueueMetadata {
            target_rig: "gastown".to_string(),
            formula: "mol-polecat-work".to_string(),
            args: "--fast".to_string(),
            vars: "a=1,b=2".to_string(),
            enqueued_at: "2026-08-02T10:00:00Z".to_string(),
            merge: "mr".to_string(),
            convoy: "hq-cv-ab3de".to_string(),
            base_branch: "main".to_string(),
            no_merge: true,
            account: "max".to_string(),
            agent: "claude".to_string(),
            hook_raw_bead: true,
            no_boot: false,
            owned: true,
        }
    }

    #[test]
    fn round_trip_all_fields() {
        let m = populated();
        let parsed = parse_queue_metadata(&m.format()).expect("parse");
        assert_eq!(parsed, m);
    }

    #[test]
    fn round_trip_minimal() {
        let m = QueueMetadata::new("gastown");
        let parsed = parse_queue_metadata(&m.format()).expect("parse");
        assert_eq!(parsed, m);
    }

    #[test]
    fn false_and_empty_fields_are_omitted() {
        let m = QueueMetadata {
            target_rig: "gastown".to_string(),
            ..Default::default()
        };
        let formatted = m.format();
        assert!(!formatted.contains("no_merge"));
        assert!(!formatted.contains("formula"));
        assert!(!formatted.contains("owned"));
    }

    #[test]
    fn strip_restores_original_description() {
        let desc = "Fix the war rig's flamethrower\n\nDetails inside.";
        let combined = format!("{desc}\n{}", populated().format());
        assert_eq!(strip_queue_metadata(&combined), desc);
    }

    #[test]
    fn strip_without_block_is_identity() {
        let desc = "no metadata here";
        assert_eq!(strip_queue_metadata(desc), desc);
    }

    #[test]
    fn parse_appended_block() {
        let desc = "Fix the pump\n";
        let combined = format!("{desc}{}", populated().format());
        assert_eq!(parse_queue_metadata(&combined), Some(populated()));
    }

    #[test]
    fn parse_stops_at_second_delimiter() {
        let text = format!(
            "{}\ntarget_rig: one\n{}\ntarget_rig: two\n",
            QUEUE_DELIMITER, QUEUE_DELIMITER
        );
        let m = parse_queue_metadata(&text).expect("parse");
        assert_eq!(m.target_rig, "one");
    }

    #[test]
    fn parse_tolerates_unknown_keys() {
        let text = format!("{}\ntarget_rig: rig\nfuture_field: zap\n", QUEUE_DELIMITER);
        let m = parse_queue_metadata(&text).expect("parse");
        assert_eq!(m.target_rig, "rig");
    }

    #[test]
    fn parse_stops_at_blank_line() {
        let text = format!(
            "{}\ntarget_rig: one\n\ntrailing notes\nformula: nope\n",
            QUEUE_DELIMITER
        );
        let m = parse_queue_metadata(&text).expect("parse");
        assert_eq!(m.target_rig, "one");
        assert!(m.formula.is_empty());
    }

    #[test]
    fn missing_block_parses_none() {
        assert_eq!(parse_queue_metadata("plain description"), None);
    }
}
