//! JSONL git backup patrol.
//!
//! Exports each database's issues to JSONL, strips test pollution, compares
//! line counts against the previous export in the git mirror, and commits.
//! A count swing past the spike threshold is flagged loudly: a silent
//! truncation of the backup is worse than a noisy false positive.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::DaemonPatrolConfig;
use crate::daemon::patrol::spike_threshold;
use crate::dolt::DoltClient;

/// One flagged database in a spike report.
#[derive(Debug, Clone, PartialEq)]
pub struct SpikeInfo {
    pub db: String,
    pub file: String,
    pub previous: usize,
    pub current: usize,
    /// Fractional change relative to the previous export.
    pub delta: f64,
}

/// Is this exported record test pollution?
///
/// Pollution is recognized by title (starts with `test ` / `test_`,
/// case-insensitive, which covers "Test Issue …") or by id shape: short
/// all-digit `bd-`/`gt-` suffixes, `bd-` suffixes of letters-then-digits,
/// and the `testdb_` / `beads_t` / `beads_pt` / `doctest_` families.
pub fn is_test_pollution(record: &serde_json::Map<String, serde_json::Value>) -> bool {
    if let Some(title) = record.get("title").and_then(|v| v.as_str()) {
        let lower = title.to_lowercase();
        if lower.starts_with("test ") || lower.starts_with("test_") {
            return true;
        }
    }

    if let Some(id) = record.get("id").and_then(|v| v.as_str()) {
        if is_short_digit_id(id) || is_bd_generated_id(id) {
            return true;
        }
        for prefix in ["testdb_", "beads_t", "beads_pt", "doctest_"] {
            if id.starts_with(prefix) {
                return true;
            }
        }
    }

    false
}

/// `bd-1`, `gt-42`: a 1-4 digit suffix only test fixtures produce.
fn is_short_digit_id(id: &str) -> bool {
    let Some(rest) = id.strip_prefix("bd-").or_else(|| id.strip_prefix("gt-")) else {
        return false;
    };
    !rest.is_empty() && rest.len() <= 4 && rest.bytes().all(|b| b.is_ascii_digit())
}

/// `bd-abc12`: letters then trailing digits. Real bd ids are pure hash
/// characters; the trailing-digit shape comes from test generators.
fn is_bd_generated_id(id: &str) -> bool {
    let Some(rest) = id.strip_prefix("bd-") else {
        return false;
    };
    let digits_start = rest.find(|c: char| c.is_ascii_digit());
    let Some(split) = digits_start else {
        return false;
    };
    let (letters, digits) = rest.split_at(split);
    !digits.is_empty()
        && letters.bytes().all(|b| b.is_ascii_lowercase())
        && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Filter pollution records out of a JSONL export.
///
/// Returns the filtered bytes and the number of removed records.
/// Unparseable lines are kept: the filter must never eat real data.
/// Idempotent by construction.
pub fn filter_test_pollution(input: &[u8]) -> (Vec<u8>, usize) {
    let text = String::from_utf8_lossy(input);
    let mut out = Vec::with_capacity(input.len());
    let mut removed = 0;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let polluted = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(line)
            .map(|record| is_test_pollution(&record))
            .unwrap_or(false);
        if polluted {
            removed += 1;
        } else {
            out.extend_from_slice(line.as_bytes());
            out.push(b'\n');
        }
    }

    (out, removed)
}

/// Count newline-delimited records in a file.
pub fn count_file_lines(path: &Path) -> std::io::Result<usize> {
    let data = std::fs::read_to_string(path)?;
    Ok(data.lines().count())
}

/// Parse a line count out of `wc -l`-style output (`"  42 file.jsonl"`).
pub fn parse_line_count(input: &str) -> Result<usize, String> {
    input
        .split_whitespace()
        .next()
        .ok_or_else(|| "empty line count".to_string())?
        .parse()
        .map_err(|_| format!("invalid line count {input:?}"))
}

/// Compare fresh export counts against the previous committed export.
///
/// The previous count comes from `git show HEAD:<db>/issues.jsonl`; a db
/// with no committed baseline is a first export and raises no spike.
pub fn verify_export_counts(
    git_repo: &Path,
    databases: &[String],
    counts: &std::collections::BTreeMap<String, usize>,
    threshold: f64,
) -> Vec<SpikeInfo> {
    let mut spikes = Vec::new();
    for db in databases {
        let Some(&current) = counts.get(db) else {
            continue;
        };
        let file = format!("{db}/issues.jsonl");
        let Some(previous) = previous_committed_count(git_repo, &file) else {
            continue; // first export for this db
        };
        if previous == 0 {
            continue;
        }
        let delta = (current as f64 - previous as f64).abs() / previous as f64;
        if delta > threshold {
            spikes.push(SpikeInfo {
                db: db.clone(),
                file,
                previous,
                current,
                delta,
            });
        }
    }
    spikes
}

fn previous_committed_count(git_repo: &Path, file: &str) -> Option<usize> {
    let output = Command::new("git")
        .arg("show")
        .arg(format!("HEAD:{file}"))
        .current_dir(git_repo)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    Some(text.lines().count())
}

/// Human-readable spike report, one line per flagged database.
pub fn format_spike_report(spikes: &[SpikeInfo]) -> String {
    let mut lines = Vec::with_capacity(spikes.len());
    for spike in spikes {
        let direction = if spike.current >= spike.previous {
            "JUMP"
        } else {
            "DROP"
        };
        lines.push(format!(
            "{}: {} {} -> {} ({direction} {:.0}%)",
            spike.db,
            spike.file,
            spike.previous,
            spike.current,
            spike.delta * 100.0
        ));
    }
    lines.join("\n")
}

/// Directory of the git mirror the backups land in.
pub fn backup_repo_dir(town: &Path) -> PathBuf {
    town.join(".beads-backup")
}

/// Run one backup pass: export, filter, spike-check, commit.
pub fn run_jsonl_git_backup(
    town: &Path,
    config: Option<&DaemonPatrolConfig>,
    dolt: &DoltClient,
) -> Result<Vec<SpikeInfo>, crate::dolt::DoltError> {
    let repo = backup_repo_dir(town);
    if !repo.join(".git").is_dir() {
        tracing::warn!(
            patrol = "jsonl_git_backup",
            "backup mirror missing at {}, skipping",
            repo.display()
        );
        return Ok(Vec::new());
    }

    let databases = dolt.list_databases()?;
    let threshold = spike_threshold(config);
    let mut counts = std::collections::BTreeMap::new();

    for db in &databases {
        let db_dir = repo.join(db);
        std::fs::create_dir_all(&db_dir).map_err(crate::dolt::DoltError::Launch)?;
        let dest = db_dir.join("issues.jsonl");

        let staging = dest.with_extension("jsonl.tmp");
        if let Err(err) = dolt.export_table_jsonl(db, "issues", &staging) {
            tracing::warn!(patrol = "jsonl_git_backup", db = %db, "export failed: {err}");
            continue;
        }
        let raw = std::fs::read(&staging).map_err(crate::dolt::DoltError::Launch)?;
        let _ = std::fs::remove_file(&staging);

        let (filtered, removed) = filter_test_pollution(&raw);
        if removed > 0 {
            tracing::info!(patrol = "jsonl_git_backup", db = %db, removed, "stripped test pollution");
        }
        let count = String::from_utf8_lossy(&filtered).lines().count();
        counts.insert(db.clone(), count);

        std::fs::write(&dest, &filtered).map_err(crate::dolt::DoltError::Launch)?;
    }

    // Spike check runs against the still-committed previous state, before
    // the new export is committed over it.
    let spikes = verify_export_counts(&repo, &databases, &counts, threshold);
    if !spikes.is_empty() {
        tracing::warn!(
            patrol = "jsonl_git_backup",
            "export count spikes:\n{}",
            format_spike_report(&spikes)
        );
    }

    git_commit_all(&repo, "jsonl backup");
    Ok(spikes)
}

fn git_commit_all(repo: &Path, message: &str) {
    let run = |args: &[&str]| {
        Command::new("git")
            .args(args)
            .current_dir(repo)
            .output()
            .ok()
            .filter(|o| o.status.success())
    };
    if run(&["add", "-A"]).is_none() {
        tracing::warn!("git add failed in {}", repo.display());
        return;
    }
    // Commit fails benignly when there are no changes.
    let _ = run(&["commit", "-m", message]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, title: &str) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert("id".to_string(), serde_json::Value::String(id.to_string()));
        map.insert(
            "title".to_string(),
            serde_json::Value::String(title.to_string()),
        );
        map
    }

    #[test]
    fn pollution_detection() {
        let cases = [
            ("gt-abc1", "Fix login bug", false),
            ("gt-xyz2", "Test Issue for validation", true),
            ("gt-xyz2", "test issue for validation", true),
            ("bd-1", "Something", true),
            ("bd-99", "Something", true),
            ("bd-abc12", "Something", true),
            ("testdb_foo", "Something", true),
            ("beads_t123", "Something", true),
            ("beads_pt456", "Something", true),
            ("doctest_foo", "Something", true),
            ("gt-ok1", "test_something", true),
            ("gt-ok1", "test something", true),
            ("gt-test1", "Normal title", false),
            ("bd-abcde12", "Something", true),
            ("bd-abcdef", "Something", false),
        ];
        for (id, title, want) in cases {
            assert_eq!(
                is_test_pollution(&record(id, title)),
                want,
                "id={id} title={title}"
            );
        }
        assert!(!is_test_pollution(&serde_json::Map::new()));
    }

    #[test]
    fn filter_removes_pollution_and_counts() {
        let input = [
            r#"{"id":"gt-abc1","title":"Fix bug"}"#,
            r#"{"id":"bd-1","title":"test thing"}"#,
            r#"{"id":"gt-def2","title":"Add feature"}"#,
            r#"{"id":"gt-xyz3","title":"Test Issue 42"}"#,
        ]
        .join("\n")
            + "\n";

        let (filtered, removed) = filter_test_pollution(input.as_bytes());
        assert_eq!(removed, 2);

        let text = String::from_utf8(filtered).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("gt-abc1"));
        assert!(lines[1].contains("gt-def2"));
    }

    #[test]
    fn filter_is_idempotent_and_accounts_for_every_line() {
        let input = [
            r#"{"id":"gt-abc1","title":"Fix bug"}"#,
            r#"{"id":"bd-12","title":"ok"}"#,
            r#"{"id":"gt-def2","title":"Add feature"}"#,
        ]
        .join("\n");

        let (once, removed) = filter_test_pollution(input.as_bytes());
        assert_eq!(
            String::from_utf8_lossy(&once).lines().count() + removed,
            input.lines().count()
        );

        let (twice, removed_again) = filter_test_pollution(&once);
        assert_eq!(twice, once);
        assert_eq!(removed_again, 0);
    }

    #[test]
    fn filter_keeps_unparseable_lines() {
        let input = b"not json at all\n";
        let (filtered, removed) = filter_test_pollution(input);
        assert_eq!(removed, 0);
        assert_eq!(filtered, input);
    }

    #[test]
    fn filter_empty_input() {
        let (filtered, removed) = filter_test_pollution(b"");
        assert_eq!(removed, 0);
        assert!(filtered.is_empty());
    }

    #[test]
    fn line_counting() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.jsonl");
        let mut content = String::new();
        for i in 0..42 {
            content.push_str(&format!("{{\"id\":\"rec-{i}\"}}\n"));
        }
        std::fs::write(&path, content).unwrap();
        assert_eq!(count_file_lines(&path).unwrap(), 42);

        std::fs::write(&path, "").unwrap();
        assert_eq!(count_file_lines(&path).unwrap(), 0);
    }

    #[test]
    fn line_count_parsing() {
        assert_eq!(parse_line_count("42").unwrap(), 42);
        assert_eq!(parse_line_count("  42 filename.jsonl").unwrap(), 42);
        assert_eq!(parse_line_count("  0").unwrap(), 0);
        assert!(parse_line_count("").is_err());
        assert!(parse_line_count("abc").is_err());
    }

    #[test]
    fn spike_report_mentions_direction() {
        let spikes = vec![
            SpikeInfo {
                db: "prod_beads".to_string(),
                file: "prod_beads/issues.jsonl".to_string(),
                previous: 100,
                current: 150,
                delta: 0.50,
            },
            SpikeInfo {
                db: "dev_beads".to_string(),
                file: "dev_beads/issues.jsonl".to_string(),
                previous: 200,
                current: 50,
                delta: 0.75,
            },
        ];
        let report = format_spike_report(&spikes);
        assert!(report.contains("prod_beads"));
        assert!(report.contains("dev_beads"));
        assert!(report.contains("JUMP"));
        assert!(report.contains("DROP"));
    }

    // --- git-backed spike verification ---

    fn init_git_repo(dir: &Path) {
        let run = |args: &[&str]| {
            let status = Command::new("git")
                .args(args)
                .current_dir(dir)
                .output()
                .expect("git");
            assert!(status.status.success(), "git {args:?} failed");
        };
        run(&["init"]);
        run(&["config", "user.email", "test@test.invalid"]);
        run(&["config", "user.name", "Test"]);
        std::fs::write(dir.join("README"), "init\n").unwrap();
        run(&["add", "-A"]);
        run(&["commit", "-m", "init"]);
    }

    fn commit_n_lines(repo: &Path, db: &str, n: usize) {
        let db_dir = repo.join(db);
        std::fs::create_dir_all(&db_dir).unwrap();
        let mut content = String::new();
        for i in 0..n {
            content.push_str(&format!("{{\"id\":\"rec-{i}\"}}\n"));
        }
        std::fs::write(db_dir.join("issues.jsonl"), content).unwrap();
        git_commit_all(repo, "baseline");
    }

    fn counts_of(db: &str, n: usize) -> std::collections::BTreeMap<String, usize> {
        let mut counts = std::collections::BTreeMap::new();
        counts.insert(db.to_string(), n);
        counts
    }

    #[test]
    fn first_export_raises_no_spike() {
        let repo = tempfile::tempdir().expect("tempdir");
        init_git_repo(repo.path());

        let spikes = verify_export_counts(
            repo.path(),
            &["testdb".to_string()],
            &counts_of("testdb", 100),
            0.20,
        );
        assert!(spikes.is_empty());
    }

    #[test]
    fn within_threshold_is_quiet() {
        let repo = tempfile::tempdir().expect("tempdir");
        init_git_repo(repo.path());
        commit_n_lines(repo.path(), "testdb", 100);

        let spikes = verify_export_counts(
            repo.path(),
            &["testdb".to_string()],
            &counts_of("testdb", 110),
            0.20,
        );
        assert!(spikes.is_empty(), "10% change is under 20% threshold");
    }

    #[test]
    fn jump_past_threshold_is_flagged() {
        let repo = tempfile::tempdir().expect("tempdir");
        init_git_repo(repo.path());
        commit_n_lines(repo.path(), "testdb", 100);

        let spikes = verify_export_counts(
            repo.path(),
            &["testdb".to_string()],
            &counts_of("testdb", 130),
            0.20,
        );
        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes[0].db, "testdb");
        assert_eq!((spikes[0].previous, spikes[0].current), (100, 130));
    }

    #[test]
    fn drop_past_threshold_is_flagged() {
        let repo = tempfile::tempdir().expect("tempdir");
        init_git_repo(repo.path());
        commit_n_lines(repo.path(), "testdb", 100);

        let spikes = verify_export_counts(
            repo.path(),
            &["testdb".to_string()],
            &counts_of("testdb", 60),
            0.20,
        );
        assert_eq!(spikes.len(), 1);
        assert!(spikes[0].delta > 0.3);
    }
}
