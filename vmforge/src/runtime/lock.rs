//! Runtime lock on VMFORGE_HOME.
//!
//! Uses flock so the lock is released even if the process crashes.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vmforge_shared::{ConfigError, VmforgeError, VmforgeResult};

/// How a manager holds its home directory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HomeLockMode {
    /// Sole owner; refuses any other manager on the same home.
    #[default]
    Exclusive,
    /// Coexists with other shared holders. One-shot processes such as the
    /// CLI use this; cross-process races are settled by the control plane
    /// and by exclusive volume creation.
    Shared,
}

/// Lock on `<home>/.lock`, released on drop.
#[derive(Debug)]
pub struct RuntimeLock {
    file: File,
    path: PathBuf,
}

impl RuntimeLock {
    /// Try to take the lock without blocking.
    ///
    /// Fails with [`ConfigError::HomeInUse`] if the requested mode conflicts
    /// with a lock another manager holds.
    pub fn acquire(home_dir: &Path, mode: HomeLockMode) -> VmforgeResult<Self> {
        std::fs::create_dir_all(home_dir)
            .map_err(|e| VmforgeError::Internal(format!("failed to create home dir: {}", e)))?;

        let lock_path = home_dir.join(".lock");

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| VmforgeError::Internal(format!("failed to open lock file: {}", e)))?;

        let operation = match mode {
            HomeLockMode::Exclusive => libc::LOCK_EX,
            HomeLockMode::Shared => libc::LOCK_SH,
        };

        {
            use std::os::unix::io::AsRawFd;

            let fd = file.as_raw_fd();
            let result = unsafe { libc::flock(fd, operation | libc::LOCK_NB) };

            if result != 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::WouldBlock {
                    return Err(ConfigError::HomeInUse {
                        path: home_dir.display().to_string(),
                    }
                    .into());
                }
                return Err(VmforgeError::Internal(format!(
                    "failed to acquire lock: {}",
                    err
                )));
            }
        }

        tracing::debug!(lock_path = %lock_path.display(), ?mode, "Acquired runtime lock");

        Ok(RuntimeLock {
            file,
            path: lock_path,
        })
    }
}

impl Drop for RuntimeLock {
    fn drop(&mut self) {
        use std::os::unix::io::AsRawFd;
        let fd = self.file.as_raw_fd();
        unsafe {
            libc::flock(fd, libc::LOCK_UN);
        }

        tracing::debug!(lock_path = %self.path.display(), "Released runtime lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_exclusive_acquire_fails() {
        let home = tempfile::tempdir().unwrap();
        let lock = RuntimeLock::acquire(home.path(), HomeLockMode::Exclusive).unwrap();
        assert!(home.path().join(".lock").exists());

        let err = RuntimeLock::acquire(home.path(), HomeLockMode::Exclusive).unwrap_err();
        assert_eq!(err.code_name(), "HOME_IN_USE");
        assert!(err.to_string().contains("already using"));

        drop(lock);
        RuntimeLock::acquire(home.path(), HomeLockMode::Exclusive).unwrap();
    }

    #[test]
    fn test_shared_holders_coexist() {
        let home = tempfile::tempdir().unwrap();
        let first = RuntimeLock::acquire(home.path(), HomeLockMode::Shared).unwrap();
        let second = RuntimeLock::acquire(home.path(), HomeLockMode::Shared).unwrap();

        let err = RuntimeLock::acquire(home.path(), HomeLockMode::Exclusive).unwrap_err();
        assert_eq!(err.code_name(), "HOME_IN_USE");

        drop(first);
        drop(second);
        let exclusive = RuntimeLock::acquire(home.path(), HomeLockMode::Exclusive).unwrap();
        RuntimeLock::acquire(home.path(), HomeLockMode::Shared).unwrap_err();
        drop(exclusive);
    }
}
