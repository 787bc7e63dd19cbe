//! PID files with ownership nonces.
//!
//! Format: first line decimal PID, second line a 16-hex-char random nonce
//! written fresh on every write. On read we verify both that the PID is
//! alive and that a nonce is present, which guards against PID reuse
//! without fragile command-line matching. Legacy single-line files (PID
//! only) are accepted with reduced guarantees.

use std::path::Path;

use rand::Rng;

/// Result of checking a PID file against the live process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidOwnership {
    pub pid: u32,
    pub alive: bool,
    /// Empty for legacy files; such files get upgraded on the next write.
    pub nonce: String,
}

/// Write a PID file with a fresh ownership nonce, atomically
/// (temp file + rename). Returns the nonce written.
pub fn write_pid_file(path: &Path, pid: u32) -> std::io::Result<String> {
    let nonce = generate_nonce();
    let content = format!("{pid}\n{nonce}");

    let dir = path.parent().ok_or_else(|| {
        std::io::Error::other("pid file path missing parent directory")
    })?;
    std::fs::create_dir_all(dir)?;
    let temp = tempfile::NamedTempFile::new_in(dir)?;
    std::fs::write(temp.path(), content.as_bytes())?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(nonce)
}

/// Read a PID file, returning `(pid, nonce)`. Legacy single-line files
/// yield an empty nonce.
pub fn read_pid_file(path: &Path) -> std::io::Result<(u32, String)> {
    let data = std::fs::read_to_string(path)?;
    let mut lines = data.trim().lines();

    let pid_line = lines.next().unwrap_or("").trim();
    if pid_line.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "empty PID file",
        ));
    }
    let pid = pid_line.parse::<u32>().map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid PID in file: {pid_line:?}"),
        )
    })?;

    let nonce = lines.next().unwrap_or("").trim().to_string();
    Ok((pid, nonce))
}

/// Check whether a PID file represents a live process we own.
///
/// Missing file is `None`, not an error. A live PID with a nonce is fully
/// trusted (we wrote pid + nonce atomically; a reused PID would not carry
/// our nonce). A live PID without a nonce is the legacy path: accepted,
/// but without reuse protection.
pub fn verify_pid_ownership(path: &Path) -> std::io::Result<Option<PidOwnership>> {
    let (pid, nonce) = match read_pid_file(path) {
        Ok(parsed) => parsed,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };

    Ok(Some(PidOwnership {
        pid,
        alive: process_alive(pid),
        nonce,
    }))
}

/// Random 8-byte hex string (16 chars) for PID file ownership.
pub fn generate_nonce() -> String {
    let bytes: [u8; 8] = rand::thread_rng().r#gen();
    let mut out = String::with_capacity(16);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Signal-0-style liveness probe.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    if Path::new("/proc").is_dir() {
        return Path::new("/proc").join(pid.to_string()).exists();
    }
    std::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(windows)]
pub fn process_alive(pid: u32) -> bool {
    std::process::Command::new("tasklist")
        .args(["/FI", &format!("PID eq {pid}"), "/NH"])
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
        .unwrap_or(false)
}
