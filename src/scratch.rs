//! Per-proxy scratch directories and startup garbage collection
//!
//! Every proxy instance keeps its socket inside a private directory under
//! the sockets root. The directory carries two markers:
//!
//! - `agent-proxy.pid`: the owning process id, in decimal
//! - `.lock`: a file the owner holds an exclusive advisory lock on for the
//!   directory's whole lifetime
//!
//! If the process is killed, `Drop` never runs and the directory is left
//! behind. [`cleanup_orphans`] runs at startup, before any new proxy is
//! created, and removes directories whose owner is gone. A free lock means
//! the owner is gone even when its PID has since been reused; directories
//! without a lock file fall back to the PID check alone.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Name prefix of every scratch directory
pub const SCRATCH_PREFIX: &str = "agent-proxy-";

/// PID marker file name
pub const PID_FILE_NAME: &str = "agent-proxy.pid";

/// Advisory lock file name
pub const LOCK_FILE_NAME: &str = ".lock";

/// Directories without a readable PID file are left alone this long
const ORPHAN_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Default sockets root: `$XDG_RUNTIME_DIR/agent-proxy`, else the temp dir
pub fn default_sockets_root() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("agent-proxy")
}

/// A private, owner-only directory holding one proxy's socket
#[derive(Debug)]
pub struct ScratchDir {
    dir: Option<TempDir>,
    path: PathBuf,
    /// Holds the advisory lock until the directory is removed
    _lock: File,
}

impl ScratchDir {
    /// Create a uniquely named scratch directory under `root`
    pub fn create(root: &Path) -> Result<Self> {
        ensure_root(root)?;

        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(root)
            .map_err(|e| {
                Error::Lifecycle(format!(
                    "Failed to create scratch directory under {}: {}",
                    root.display(),
                    e
                ))
            })?;
        let path = dir.path().to_path_buf();

        fs::set_permissions(&path, fs::Permissions::from_mode(0o700)).map_err(|e| {
            Error::Lifecycle(format!(
                "Failed to restrict permissions on {}: {}",
                path.display(),
                e
            ))
        })?;

        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path.join(LOCK_FILE_NAME))
            .and_then(|file| file.try_lock_exclusive().map(|()| file))
            .map_err(|e| {
                Error::Lifecycle(format!(
                    "Failed to lock scratch directory {}: {}",
                    path.display(),
                    e
                ))
            })?;

        fs::write(path.join(PID_FILE_NAME), std::process::id().to_string()).map_err(|e| {
            Error::Lifecycle(format!(
                "Failed to write PID file in {}: {}",
                path.display(),
                e
            ))
        })?;

        debug!(path = %path.display(), "Created scratch directory");
        Ok(Self {
            dir: Some(dir),
            path,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a file inside the directory
    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.path.join(PID_FILE_NAME)
    }

    /// Delete the directory and everything in it
    pub fn remove(mut self) -> Result<()> {
        if let Some(dir) = self.dir.take() {
            dir.close().map_err(|e| {
                Error::Lifecycle(format!(
                    "Failed to remove scratch directory {}: {}",
                    self.path.display(),
                    e
                ))
            })?;
            debug!(path = %self.path.display(), "Removed scratch directory");
        }
        Ok(())
    }
}

fn ensure_root(root: &Path) -> Result<()> {
    if root.is_dir() {
        return Ok(());
    }
    DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(root)
        .map_err(|e| {
            Error::Lifecycle(format!(
                "Failed to create sockets root {}: {}",
                root.display(),
                e
            ))
        })
}

/// Outcome of an orphan sweep
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Directories deleted because their owner is gone
    pub removed: Vec<PathBuf>,
    /// Directories left in place
    pub kept: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Alive,
    Gone,
    Unknown,
}

/// Remove scratch directories left behind by processes that no longer run
pub fn cleanup_orphans(root: &Path) -> Result<CleanupReport> {
    sweep(root, ORPHAN_GRACE_PERIOD)
}

fn sweep(root: &Path, grace: Duration) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();

    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(root = %root.display(), "No sockets root, nothing to clean up");
            return Ok(report);
        }
        Err(e) => return Err(e.into()),
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let is_scratch = entry.file_name().to_string_lossy().starts_with(SCRATCH_PREFIX);
        if !is_scratch || !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }

        let orphaned = match owner_of(&path) {
            Owner::Alive => false,
            Owner::Gone => true,
            Owner::Unknown => older_than(&path, grace),
        };

        if !orphaned {
            debug!(path = %path.display(), "Scratch directory still owned");
            report.kept.push(path);
            continue;
        }

        match fs::remove_dir_all(&path) {
            Ok(()) => {
                info!(path = %path.display(), "Removed orphaned scratch directory");
                report.removed.push(path);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove orphaned scratch directory");
                report.kept.push(path);
            }
        }
    }

    Ok(report)
}

fn owner_of(dir: &Path) -> Owner {
    if let Ok(lock) = File::open(dir.join(LOCK_FILE_NAME)) {
        return match lock.try_lock_exclusive() {
            Ok(()) => Owner::Gone,
            Err(_) => Owner::Alive,
        };
    }

    match read_pid(&dir.join(PID_FILE_NAME)) {
        Some(pid) if process_alive(pid) => Owner::Alive,
        Some(_) => Owner::Gone,
        None => Owner::Unknown,
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn older_than(path: &Path, age: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|elapsed| elapsed >= age)
}

/// Check if a process with the given PID exists
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 only performs existence and permission checks
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
