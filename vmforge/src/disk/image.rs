//! RAII-managed volume file.

use std::path::{Path, PathBuf};

/// Volume format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskFormat {
    /// QCOW2, used for root disks.
    Qcow2,
    /// Raw bytes, used for ISO seed volumes.
    Raw,
}

impl DiskFormat {
    /// Driver type name as used in domain definitions.
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskFormat::Qcow2 => "qcow2",
            DiskFormat::Raw => "raw",
        }
    }
}

/// A volume file owned by one VM.
///
/// Deleted when dropped unless [`Disk::persist`] was called, so a failed
/// provisioning pass never leaves orphaned volumes behind.
#[derive(Debug)]
pub struct Disk {
    path: PathBuf,
    format: DiskFormat,
    /// Volume name inside its pool.
    volume: String,
    persistent: bool,
}

impl Disk {
    pub fn new(path: PathBuf, format: DiskFormat, persistent: bool) -> Self {
        let volume = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            format,
            volume,
            persistent,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> DiskFormat {
        self.format
    }

    pub fn volume(&self) -> &str {
        &self.volume
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Keep the file after drop (success path).
    pub fn persist(&mut self) {
        self.persistent = true;
    }

    /// Consume the handle, keeping the file.
    pub fn into_path(mut self) -> PathBuf {
        self.persistent = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for Disk {
    fn drop(&mut self) {
        if self.persistent {
            return;
        }

        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!("Failed to cleanup volume {}: {}", self.path.display(), e);
            } else {
                tracing::debug!("Cleaned up volume: {}", self.path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vm-001.qcow2");
        std::fs::write(&path, b"qcow").unwrap();

        let disk = Disk::new(path.clone(), DiskFormat::Qcow2, false);
        assert_eq!(disk.volume(), "vm-001.qcow2");
        drop(disk);
        assert!(!path.exists());
    }

    #[test]
    fn test_persisted_disk_survives_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vm-001-seed.iso");
        std::fs::write(&path, b"iso").unwrap();

        let mut disk = Disk::new(path.clone(), DiskFormat::Raw, false);
        disk.persist();
        drop(disk);
        assert!(path.exists());

        let disk = Disk::new(path.clone(), DiskFormat::Raw, false);
        assert_eq!(disk.into_path(), path);
        assert!(path.exists());
    }
}
