//! Cross-process deploy lock with stale-holder recovery

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::errors::DeployError;
use crate::filesys::file::File;

/// Attempts to replace a stale or corrupt record before giving up
const MAX_ACQUIRE_ATTEMPTS: usize = 3;

/// Contents of the lock file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockHolder {
    /// Process ID of the holder
    pub pid: u32,

    /// Acquisition time, seconds since the Unix epoch
    pub timestamp: f64,
}

impl LockHolder {
    /// Record for the calling process
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            timestamp: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
        }
    }

    /// Acquisition time as a UTC datetime
    pub fn acquired_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros((self.timestamp * 1_000_000.0) as i64)
    }
}

/// Returns whether `pid` may still be running.
///
/// Only an explicit "no such process" counts as dead. A holder we are not
/// permitted to signal, or cannot see, is treated as alive.
#[cfg(unix)]
pub fn is_pid_running(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        // Not a valid pid on this platform
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs only the existence and permission checks
    let result = if unsafe { libc::kill(pid, 0) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    };
    liveness_from_signal(result)
}

/// Returns whether `pid` is present in the process table.
///
/// Platforms where the process table cannot be read report every holder as
/// alive.
#[cfg(not(unix))]
pub fn is_pid_running(pid: u32) -> bool {
    if !sysinfo::IS_SUPPORTED_SYSTEM {
        return true;
    }
    let pid = sysinfo::Pid::from_u32(pid);
    let mut system = sysinfo::System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

/// Interpret the result of a signal-0 check: only `ESRCH` means dead
#[cfg(unix)]
fn liveness_from_signal(result: std::io::Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => e.raw_os_error() != Some(libc::ESRCH),
    }
}

/// What the serialized inspect-and-replace step found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inspection {
    /// A live process holds the lock
    Held(u32),
    /// The record is gone or was removed; try to create again
    Vacant,
}

/// Advisory deploy lock backed by a single JSON file.
///
/// Creating the record is atomic. Breaking a stale or corrupt record happens
/// only while holding an exclusive OS lock on a sibling `<name>.guard` file,
/// so two contenders can never both delete and recreate it.
#[derive(Debug, Clone)]
pub struct DeployLock {
    file: File,
    guard_path: PathBuf,
}

impl DeployLock {
    /// Create a lock handle for the given file
    pub fn new(file: File) -> Self {
        let name = file
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let guard_path = file.path().with_file_name(format!("{}.guard", name));
        Self { file, guard_path }
    }

    /// Try to take the lock for this process.
    ///
    /// Returns `Ok(false)` when a live process holds it. Stale and corrupt
    /// records are replaced.
    pub async fn acquire(&self) -> Result<bool, DeployError> {
        for _ in 0..MAX_ACQUIRE_ATTEMPTS {
            if self.file.create_new_json(&LockHolder::current()).await? {
                debug!("Deploy lock acquired: {}", self.file.path().display());
                return Ok(true);
            }

            match self.inspect_and_clear().await? {
                Inspection::Held(pid) => {
                    debug!("Deploy lock held by live PID {}", pid);
                    return Ok(false);
                }
                Inspection::Vacant => continue,
            }
        }

        Ok(false)
    }

    /// Re-read the record under the guard lock and delete it unless a live
    /// process holds it
    async fn inspect_and_clear(&self) -> Result<Inspection, DeployError> {
        let _exclusive = self.lock_guard_file().await?;

        match self.file.read_json::<LockHolder>().await {
            Ok(holder) if holder.pid != 0 && is_pid_running(holder.pid) => {
                return Ok(Inspection::Held(holder.pid));
            }
            Ok(holder) => {
                warn!("Breaking stale deploy lock held by PID {}", holder.pid);
            }
            Err(DeployError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                // Released since our create attempt
                return Ok(Inspection::Vacant);
            }
            Err(e) => {
                warn!("Overwriting corrupt deploy lock: {}", e);
            }
        }

        self.file.delete().await?;
        Ok(Inspection::Vacant)
    }

    /// Block until this process holds the exclusive guard lock. The lock is
    /// released when the returned handle is dropped. The guard file itself is
    /// never removed.
    async fn lock_guard_file(&self) -> Result<std::fs::File, DeployError> {
        let path = self.guard_path.clone();
        tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            file.lock_exclusive()?;
            Ok::<_, std::io::Error>(file)
        })
        .await
        .map_err(|e| DeployError::Internal(format!("lock guard task failed: {}", e)))?
        .map_err(DeployError::from)
    }

    /// Take the lock and return a guard that releases it on drop
    pub async fn try_lock(&self) -> Result<Option<LockGuard>, DeployError> {
        if self.acquire().await? {
            Ok(Some(LockGuard {
                file: self.file.clone(),
                released: false,
            }))
        } else {
            Ok(None)
        }
    }

    /// Remove the lock file. Releasing an absent lock is a no-op.
    pub async fn release(&self) -> Result<(), DeployError> {
        self.file.delete().await
    }

    /// Inspect the current holder without modifying the lock
    pub async fn read_holder(&self) -> Option<LockHolder> {
        self.file.read_json::<LockHolder>().await.ok()
    }
}

/// Held deploy lock. Dropping the guard without [`LockGuard::release`]
/// still removes the lock file.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    released: bool,
}

impl LockGuard {
    /// Release the lock
    pub async fn release(mut self) -> Result<(), DeployError> {
        self.released = true;
        self.file.delete().await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.file.delete_blocking() {
            error!("Failed to release deploy lock: {}", e);
        }
    }
}
