use std::path::{Path, PathBuf};
use vmforge_shared::{VmforgeError, VmforgeResult};

/// Directory structure constants
pub mod dirs {
    /// Base directory name for vmforge data
    pub const VMFORGE_DIR: &str = ".vmforge";

    /// Subdirectory for log files
    pub const LOGS_DIR: &str = "logs";

    /// Packaged seed images waiting to be moved into the pool
    pub const SEEDS_DIR: &str = "seeds";

    /// Per-request scratch directories for seed rendering
    pub const TMP_DIR: &str = "tmp";
}

/// Filesystem layout of the vmforge home directory.
///
/// ```text
/// ~/.vmforge/
///   .lock     RuntimeLock
///   logs/     daily rolling log files
///   seeds/    packaged seed images (staging)
///   tmp/      scratch directories, one per request
/// ```
#[derive(Clone, Debug)]
pub struct FilesystemLayout {
    home_dir: PathBuf,
}

impl FilesystemLayout {
    pub fn new(home_dir: PathBuf) -> Self {
        Self { home_dir }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::LOGS_DIR)
    }

    pub fn seeds_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::SEEDS_DIR)
    }

    /// Default scratch root: ~/.vmforge/tmp
    pub fn temp_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::TMP_DIR)
    }

    /// Create the directory tree.
    pub fn prepare(&self) -> VmforgeResult<()> {
        for dir in [
            self.home_dir.clone(),
            self.logs_dir(),
            self.seeds_dir(),
            self.temp_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                VmforgeError::Internal(format!("failed to create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}
