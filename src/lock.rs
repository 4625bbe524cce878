//! Exclusive project ownership via a PID lock file
//!
//! The `.lock` file under the project root holds the owner's PID as a
//! decimal integer. A lock whose PID no longer maps to a live process is
//! stale and may be reclaimed. Acquisition writes the PID through a
//! tmp+rename swap and re-reads it afterwards; if another process won the
//! race the re-read reveals a foreign PID and acquisition fails.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use crate::errors::{EngineError, Result};
use crate::process::ProcessProbe;

/// Outcome of a lock acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// The lock is now held by this process
    Acquired,
    /// Another live process owns the project
    HeldByLive(u32),
    /// A lock file exists but its owner is gone; reclaim to proceed
    Stale(u32),
}

pub struct LockManager {
    path: PathBuf,
    probe: Arc<dyn ProcessProbe>,
}

impl LockManager {
    pub fn new(path: PathBuf, probe: Arc<dyn ProcessProbe>) -> Self {
        Self { path, probe }
    }

    /// PID currently recorded in the lock file, if readable
    pub fn read_pid(&self) -> Option<u32> {
        let content = fs::read_to_string(&self.path).ok()?;
        content.trim().parse::<u32>().ok()
    }

    /// Attempt to take the lock
    ///
    /// - no lock file: writes our PID and returns `Acquired`
    /// - owner alive per the probe: returns `HeldByLive(pid)` untouched
    /// - owner gone (or the file is unparseable): returns `Stale(pid)`;
    ///   pid is 0 when the recorded value could not be read
    pub fn try_acquire(&self) -> Result<LockState> {
        if self.path.exists() {
            return match self.read_pid() {
                Some(pid) if self.probe.is_alive(pid) => Ok(LockState::HeldByLive(pid)),
                Some(pid) => Ok(LockState::Stale(pid)),
                None => Ok(LockState::Stale(0)),
            };
        }
        self.write_own_pid()?;
        Ok(LockState::Acquired)
    }

    /// Remove a stale lock and take ownership
    pub fn reclaim_and_acquire(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .map_err(|e| EngineError::io("remove-stale-lock", &self.path, e))?;
        }
        self.write_own_pid()
    }

    /// Release the lock, but only if we still own it
    ///
    /// A lock recording a foreign PID is left alone; deleting it would
    /// unlock somebody else's project.
    pub fn release(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        if self.read_pid() == Some(std::process::id()) {
            fs::remove_file(&self.path)
                .map_err(|e| EngineError::io("remove-lock", &self.path, e))?;
        }
        Ok(())
    }

    /// Write our PID via tmp+rename, then verify the swap stuck
    fn write_own_pid(&self) -> Result<()> {
        let pid = std::process::id();
        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(".lock");
        let tmp = self.path.with_file_name(format!("{}.tmp", file_name));

        fs::write(&tmp, pid.to_string()).map_err(|e| EngineError::io("write-lock", &tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            EngineError::io("rename-lock", &self.path, e)
        })?;

        // Narrow the TOCTOU window: a concurrent starter may have renamed
        // its own lock over ours between our write and now.
        if self.read_pid() != Some(pid) {
            return Err(EngineError::io(
                "verify-lock",
                &self.path,
                io::Error::new(io::ErrorKind::Other, "lock owner changed during acquisition"),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir, probe: impl ProcessProbe + 'static) -> LockManager {
        LockManager::new(dir.path().join(".lock"), Arc::new(probe))
    }

    #[test]
    fn test_acquire_fresh_lock() {
        let temp = TempDir::new().unwrap();
        let lock = manager(&temp, |_pid: u32| true);

        assert_eq!(lock.try_acquire().unwrap(), LockState::Acquired);
        assert_eq!(lock.read_pid(), Some(std::process::id()));
    }

    #[test]
    fn test_live_owner_is_reported_not_evicted() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".lock"), "1000").unwrap();

        let lock = manager(&temp, |_pid: u32| true);
        assert_eq!(lock.try_acquire().unwrap(), LockState::HeldByLive(1000));
        // file untouched
        assert_eq!(lock.read_pid(), Some(1000));
    }

    #[test]
    fn test_dead_owner_is_stale_and_reclaimable() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".lock"), "1000").unwrap();

        let lock = manager(&temp, |_pid: u32| false);
        assert_eq!(lock.try_acquire().unwrap(), LockState::Stale(1000));

        lock.reclaim_and_acquire().unwrap();
        assert_eq!(lock.read_pid(), Some(std::process::id()));
    }

    #[test]
    fn test_garbage_lock_file_is_stale() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".lock"), "not-a-pid").unwrap();

        let lock = manager(&temp, |_pid: u32| true);
        assert_eq!(lock.try_acquire().unwrap(), LockState::Stale(0));
    }

    #[test]
    fn test_release_only_removes_own_lock() {
        let temp = TempDir::new().unwrap();
        let lock = manager(&temp, |_pid: u32| false);

        // foreign lock stays
        fs::write(temp.path().join(".lock"), "1000").unwrap();
        lock.release().unwrap();
        assert!(temp.path().join(".lock").exists());

        // our own lock goes
        lock.reclaim_and_acquire().unwrap();
        lock.release().unwrap();
        assert!(!temp.path().join(".lock").exists());
    }

    #[test]
    fn test_release_without_lock_is_noop() {
        let temp = TempDir::new().unwrap();
        let lock = manager(&temp, |_pid: u32| false);
        lock.release().unwrap();
    }
}
