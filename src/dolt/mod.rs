//! Driver for the external versioned SQL store.
//!
//! The store is a `dolt sql-server` process speaking the MySQL wire
//! protocol; one database per rig plus `hq` for town-level beads. This
//! module drives it (server lifecycle, probes, maintenance primitives) and
//! never reimplements it. Subprocess failures classify by exit code.

use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Transience;
use crate::paths;

pub const DEFAULT_DOLT_PORT: u16 = 3307;
pub const DEFAULT_DOLT_HOST: &str = "127.0.0.1";

#[derive(Debug, Error)]
pub enum DoltError {
    #[error("failed to launch dolt: {0}")]
    Launch(#[from] std::io::Error),

    #[error("dolt {verb} failed ({status}): {stderr}")]
    CommandFailed {
        verb: String,
        status: i32,
        stderr: String,
    },

    #[error("store unreachable at {host}:{port}")]
    Unreachable { host: String, port: u16 },

    #[error("failed to parse dolt output: {0}")]
    Parse(String),
}

impl DoltError {
    pub fn transience(&self) -> Transience {
        match self {
            DoltError::Launch(_) | DoltError::Unreachable { .. } => Transience::Retryable,
            DoltError::CommandFailed { .. } => Transience::Unknown,
            DoltError::Parse(_) => Transience::Permanent,
        }
    }
}

/// `<town>/daemon/dolt-state.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DoltServerState {
    pub pid: u32,
    pub port: u16,
    pub started_at: String,
}

#[derive(Debug, Clone)]
pub struct DoltClient {
    town: PathBuf,
    host: String,
    port: u16,
}

impl DoltClient {
    pub fn new(town: &Path) -> Self {
        Self {
            town: town.to_path_buf(),
            host: DEFAULT_DOLT_HOST.to_string(),
            port: resolve_port(),
        }
    }

    pub fn with_endpoint(town: &Path, host: &str, port: u16) -> Self {
        Self {
            town: town.to_path_buf(),
            host: host.to_string(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn db_dir(&self, db: &str) -> PathBuf {
        paths::dolt_data_dir(&self.town).join(db)
    }

    /// TCP reachability with an explicit budget.
    pub fn tcp_probe(&self, timeout: Duration) -> bool {
        let addr = format!("{}:{}", self.host, self.port);
        let Ok(mut addrs) = addr.to_socket_addrs() else {
            return false;
        };
        addrs
            .next()
            .is_some_and(|a| TcpStream::connect_timeout(&a, timeout).is_ok())
    }

    /// Run a query against a database through the server connection.
    pub fn sql(&self, db: &str, query: &str) -> Result<String, DoltError> {
        let dir = self.db_dir(db);
        let output = Command::new("dolt")
            .arg("--host")
            .arg(&self.host)
            .arg("--port")
            .arg(self.port.to_string())
            .arg("--no-tls")
            .arg("--use-db")
            .arg(db)
            .arg("sql")
            .arg("-q")
            .arg(query)
            .arg("-r")
            .arg("json")
            .current_dir(if dir.is_dir() { dir } else { self.town.clone() })
            .output()?;
        if !output.status.success() {
            return Err(DoltError::CommandFailed {
                verb: "sql".to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// `SELECT 1` round-trip time. The probe's budget is the caller's
    /// subprocess timeout story; the measurement itself is wall clock.
    pub fn latency_probe(&self, db: &str) -> Result<Duration, DoltError> {
        let start = Instant::now();
        self.sql(db, "SELECT 1")?;
        Ok(start.elapsed())
    }

    /// Databases = subdirectories of the data dir. Works without a live
    /// server, which is exactly when the doctor needs it.
    pub fn list_databases(&self) -> Result<Vec<String>, DoltError> {
        let data = paths::dolt_data_dir(&self.town);
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(&data) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if let Some(name) = name.to_str()
                && !name.starts_with('.')
            {
                out.push(name.to_string());
            }
        }
        out.sort();
        Ok(out)
    }

    /// Commit count on the database's main branch.
    pub fn commit_count(&self, db: &str) -> Result<u64, DoltError> {
        let out = self.sql(db, "SELECT count(*) AS c FROM dolt_log")?;
        parse_count(&out)
    }

    /// Compact a database: rebase-squash history, then garbage-collect.
    ///
    /// Order is load-bearing: gc without the rebase reclaims nothing. If the
    /// rebase fails, gc is not attempted and the next patrol run starts the
    /// whole compaction over.
    pub fn compact(&self, db: &str, keep_recent: u64) -> Result<(), DoltError> {
        self.sql(
            db,
            &format!("CALL DOLT_REBASE('--squash-older-than', '{keep_recent}')"),
        )?;
        self.run_in_db(db, "gc", &["gc"])?;
        Ok(())
    }

    /// Push configured remotes. Failures are the caller's to tolerate.
    pub fn push_remotes(&self, db: &str) -> Result<(), DoltError> {
        self.run_in_db(db, "push", &["push"])?;
        Ok(())
    }

    /// Create and initialize a database directory for a rig.
    pub fn init_database(&self, db: &str) -> Result<(), DoltError> {
        let dir = self.db_dir(db);
        std::fs::create_dir_all(&dir)?;
        self.run_in_db(db, "init", &["init"])?;
        Ok(())
    }

    /// Export a table as JSONL via `dolt table export`.
    pub fn export_table_jsonl(&self, db: &str, table: &str, dest: &Path) -> Result<(), DoltError> {
        let dest_str = dest.display().to_string();
        self.run_in_db(db, "table export", &["table", "export", "-f", table, &dest_str])?;
        Ok(())
    }

    fn run_in_db(&self, db: &str, verb: &str, args: &[&str]) -> Result<String, DoltError> {
        let output = Command::new("dolt")
            .args(args)
            .current_dir(self.db_dir(db))
            .output()?;
        if !output.status.success() {
            return Err(DoltError::CommandFailed {
                verb: verb.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Start the store server detached, logging to the fixed server log and
    /// recording pid + state files.
    pub fn start_server(&self) -> Result<DoltServerState, DoltError> {
        let data = paths::dolt_data_dir(&self.town);
        std::fs::create_dir_all(&data)?;
        std::fs::create_dir_all(paths::daemon_dir(&self.town))?;

        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(paths::dolt_log_path(&self.town))?;

        let child = Command::new("dolt")
            .arg("sql-server")
            .arg("--host")
            .arg(&self.host)
            .arg("--port")
            .arg(self.port.to_string())
            .current_dir(&data)
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .spawn()?;

        let state = DoltServerState {
            pid: child.id(),
            port: self.port,
            started_at: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
        };

        crate::daemon::write_pid_file(&paths::dolt_pid_path(&self.town), state.pid)
            .map_err(|e| DoltError::Parse(format!("writing dolt.pid: {e}")))?;
        let state_json =
            serde_json::to_vec_pretty(&state).map_err(|e| DoltError::Parse(e.to_string()))?;
        std::fs::write(paths::dolt_state_path(&self.town), state_json)?;
        Ok(state)
    }

    /// Stop the store server if the pid file is ours.
    pub fn stop_server(&self) -> Result<bool, DoltError> {
        let pid_path = paths::dolt_pid_path(&self.town);
        let ownership = crate::daemon::verify_pid_ownership(&pid_path)
            .map_err(|e| DoltError::Parse(format!("reading dolt.pid: {e}")))?;
        let Some(owned) = ownership else {
            return Ok(false);
        };
        if !owned.alive {
            let _ = std::fs::remove_file(&pid_path);
            return Ok(false);
        }
        let status = Command::new("kill").arg(owned.pid.to_string()).status()?;
        if status.success() {
            let _ = std::fs::remove_file(&pid_path);
            let _ = std::fs::remove_file(paths::dolt_state_path(&self.town));
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

fn resolve_port() -> u16 {
    std::env::var("GT_DOLT_PORT")
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(DEFAULT_DOLT_PORT)
}

/// Extract a single count from a `-r json` result set.
fn parse_count(output: &str) -> Result<u64, DoltError> {
    #[derive(Deserialize)]
    struct Rows {
        rows: Vec<serde_json::Map<String, serde_json::Value>>,
    }
    let rows: Rows =
        serde_json::from_str(output.trim()).map_err(|e| DoltError::Parse(e.to_string()))?;
    let row = rows
        .rows
        .first()
        .ok_or_else(|| DoltError::Parse("empty result set".to_string()))?;
    let value = row
        .values()
        .next()
        .ok_or_else(|| DoltError::Parse("empty row".to_string()))?;
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| DoltError::Parse(format!("non-integer count {n}"))),
        serde_json::Value::String(s) => s
            .parse()
            .map_err(|_| DoltError::Parse(format!("non-integer count {s:?}"))),
        other => Err(DoltError::Parse(format!("unexpected count value {other}"))),
    }
}

/// Per-database on-disk size, recursive.
pub fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    if !path.exists() {
        return Ok(0);
    }
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}
