use crate::error::{OpsError, Result};
use crate::{io, process};
use std::path::{Path, PathBuf};

/// Holds the monitor PID file for its lifetime; the file is removed on drop.
#[derive(Debug)]
pub struct PidGuard {
    path: PathBuf,
}

impl PidGuard {
    /// Claim `path` for the current process. A file naming another live
    /// process is an error; a stale or unreadable file is overwritten.
    pub fn acquire(path: &Path) -> Result<Self> {
        let me = std::process::id();
        if let Some(pid) = read_pid(path) {
            if pid != me && process::is_alive(pid) {
                return Err(OpsError::AlreadyRunning(pid));
            }
            tracing::debug!(pid, "replacing stale pid file");
        }
        io::atomic_write(path, format!("{me}\n").as_bytes())?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidGuard {
    fn drop(&mut self) {
        // Only remove the file if it still names us.
        if read_pid(&self.path) == Some(std::process::id()) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

pub fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn acquire_writes_and_drop_removes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitor.pid");
        {
            let guard = PidGuard::acquire(&path).unwrap();
            assert_eq!(read_pid(guard.path()), Some(std::process::id()));
        }
        assert!(!path.exists());
    }

    #[test]
    fn live_foreign_pid_blocks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitor.pid");
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        std::fs::write(&path, format!("{}\n", child.id())).unwrap();

        let err = PidGuard::acquire(&path).unwrap_err();
        assert!(matches!(err, OpsError::AlreadyRunning(pid) if pid == child.id()));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn pid_owned_by_another_user_blocks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitor.pid");
        std::fs::write(&path, "1\n").unwrap();
        let err = PidGuard::acquire(&path).unwrap_err();
        assert!(matches!(err, OpsError::AlreadyRunning(1)));
        assert_eq!(read_pid(&path), Some(1));
    }

    #[test]
    fn stale_or_garbage_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitor.pid");
        std::fs::write(&path, "not a pid").unwrap();
        let guard = PidGuard::acquire(&path).unwrap();
        assert_eq!(read_pid(guard.path()), Some(std::process::id()));
    }
}
