//! Per-bead advisory dispatch lock.
//!
//! Dispatches against the same bead must be strictly serialized. The lock is
//! a file under `<town>/.runtime/locks/` held exclusively (flock) for the
//! duration of the dispatch; dropping the guard releases it. On Windows the
//! lock degrades to best-effort: concurrent dispatches to the same bead may
//! both run there.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use super::SlingError;

/// Held lock; released on drop.
#[derive(Debug)]
pub struct BeadLock {
    _file: File,
    path: PathBuf,
}

impl BeadLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn lock_path(town: &Path, bead_id: &str) -> PathBuf {
    crate::paths::locks_dir(town).join(format!("sling-{bead_id}.lock"))
}

/// Try to take the per-bead dispatch lock without blocking.
///
/// Fails with [`SlingError::AlreadySlinging`] when another dispatch holds it.
pub fn try_acquire_bead_lock(town: &Path, bead_id: &str) -> Result<BeadLock, SlingError> {
    let path = lock_path(town, bead_id);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(SlingError::LockIo)?;
    }

    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(SlingError::LockIo)?;

    #[cfg(unix)]
    {
        if file.try_lock_exclusive().is_err() {
            return Err(SlingError::AlreadySlinging {
                bead_id: bead_id.to_string(),
            });
        }
    }
    // On Windows flock semantics differ enough that the lock is a no-op;
    // callers tolerate best-effort mutual exclusion there.

    Ok(BeadLock { _file: file, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_while_held_released_on_drop() {
        let town = tempfile::tempdir().expect("tempdir");

        let guard = try_acquire_bead_lock(town.path(), "gt-locktest1").expect("first acquire");

        let contended = try_acquire_bead_lock(town.path(), "gt-locktest1");
        assert!(matches!(
            contended,
            Err(SlingError::AlreadySlinging { ref bead_id }) if bead_id == "gt-locktest1"
        ));

        drop(guard);

        try_acquire_bead_lock(town.path(), "gt-locktest1").expect("re-acquire after release");
    }

    #[test]
    fn distinct_beads_do_not_contend() {
        let town = tempfile::tempdir().expect("tempdir");
        let _a = try_acquire_bead_lock(town.path(), "gt-a").expect("a");
        let _b = try_acquire_bead_lock(town.path(), "gt-b").expect("b");
    }
}
