use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use vmforge_shared::{StorageError, VmforgeResult};

use crate::disk::constants::{GIB, root_volume_name, seed_volume_name};
use crate::disk::{Disk, DiskFormat};
use crate::hypervisor::{DiskCloner, PoolInfo, StoragePoolControl};

/// Places per-VM volumes in the configured storage pool.
///
/// Volume names are allocated under a pool-level lock by creating the target
/// file exclusively, so two requests can never claim the same volume. The
/// golden image is only ever read.
pub struct StorageProvisioner {
    uri: String,
    control: Arc<dyn StoragePoolControl>,
    cloner: Arc<dyn DiskCloner>,
    pool: String,
    base_image: PathBuf,
    allocation: Mutex<()>,
}

impl StorageProvisioner {
    pub fn new(
        uri: impl Into<String>,
        control: Arc<dyn StoragePoolControl>,
        cloner: Arc<dyn DiskCloner>,
        pool: impl Into<String>,
        base_image: impl Into<PathBuf>,
    ) -> Self {
        Self {
            uri: uri.into(),
            control,
            cloner,
            pool: pool.into(),
            base_image: base_image.into(),
            allocation: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Look up the configured pool and require it to be active.
    pub async fn resolve_pool(&self) -> VmforgeResult<PoolInfo> {
        let info = self
            .control
            .lookup_pool(&self.pool)
            .await
            .map_err(|e| {
                e.into_typed(&self.uri, |libvirt_error| StorageError::PoolLookupFailed {
                    pool: self.pool.clone(),
                    libvirt_error,
                })
            })?
            .ok_or_else(|| StorageError::PoolNotFound {
                pool: self.pool.clone(),
            })?;

        if !info.active {
            return Err(StorageError::PoolInactive {
                pool: self.pool.clone(),
            }
            .into());
        }
        Ok(info)
    }

    /// Derive the root disk of `vm_name` from the golden image.
    ///
    /// The volume is a standalone qcow2 copy whose virtual size is at least
    /// `size_gb`. The returned [`Disk`] deletes the volume if dropped
    /// without being persisted.
    pub async fn provision_disk(&self, vm_name: &str, size_gb: u64) -> VmforgeResult<Disk> {
        let pool = self.resolve_pool().await?;

        if !self.base_image.is_file() {
            return Err(StorageError::BaseImageMissing {
                path: self.base_image.display().to_string(),
            }
            .into());
        }

        let disk = self
            .allocate(&pool, &root_volume_name(vm_name), DiskFormat::Qcow2)
            .await?;

        tracing::info!(
            vm_name = %vm_name,
            pool = %self.pool,
            volume = %disk.volume(),
            size_gb,
            "Deriving root disk from golden image"
        );

        self.cloner
            .clone_disk(&self.base_image, disk.path(), size_gb.saturating_mul(GIB))
            .await
            .map_err(|e| StorageError::VolumeCreateFailed {
                volume: disk.volume().to_string(),
                error: e.output(),
            })?;

        self.refresh().await;
        Ok(disk)
    }

    /// Move a packaged seed image into the pool as the seed volume of `vm_name`.
    pub async fn provision_seed_volume(
        &self,
        vm_name: &str,
        seed_image: &Path,
    ) -> VmforgeResult<Disk> {
        let pool = self.resolve_pool().await?;
        let disk = self
            .allocate(&pool, &seed_volume_name(vm_name), DiskFormat::Raw)
            .await?;

        move_file(seed_image, disk.path())
            .await
            .map_err(|e| StorageError::VolumeCreateFailed {
                volume: disk.volume().to_string(),
                error: e.to_string(),
            })?;

        tracing::debug!(
            vm_name = %vm_name,
            volume = %disk.volume(),
            "Seed volume placed in pool"
        );

        self.refresh().await;
        Ok(disk)
    }

    /// Delete volumes through the pool.
    ///
    /// A volume the pool refuses to delete is unlinked directly and the pool
    /// refreshed afterwards, so nothing is left behind either way.
    pub async fn discard(&self, disks: Vec<Disk>) {
        let mut unlinked = false;
        for mut disk in disks {
            tracing::info!(volume = %disk.volume(), "Discarding volume");
            match self.control.delete_volume(&self.pool, disk.volume()).await {
                Ok(()) => disk.persist(),
                Err(e) => {
                    tracing::warn!(
                        pool = %self.pool,
                        volume = %disk.volume(),
                        error = %e,
                        "Pool refused volume delete, removing file"
                    );
                    unlinked = true;
                }
            }
        }
        if unlinked {
            self.refresh().await;
        }
    }

    /// Claim `volume` by exclusively creating its file.
    async fn allocate(&self, pool: &PoolInfo, volume: &str, format: DiskFormat) -> VmforgeResult<Disk> {
        let _guard = self.allocation.lock().await;

        let path = pool.path.join(volume);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Disk::new(path, format, false)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(StorageError::VolumeExists {
                pool: self.pool.clone(),
                volume: volume.to_string(),
            }
            .into()),
            Err(e) => Err(StorageError::VolumeCreateFailed {
                volume: volume.to_string(),
                error: e.to_string(),
            }
            .into()),
        }
    }

    async fn refresh(&self) {
        if let Err(e) = self.control.refresh_pool(&self.pool).await {
            tracing::warn!(pool = %self.pool, error = %e, "Failed to refresh storage pool");
        }
    }
}

/// Rename, falling back to copy + remove across filesystems.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
    }
}

impl std::fmt::Debug for StorageProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageProvisioner")
            .field("pool", &self.pool)
            .field("base_image", &self.base_image)
            .finish()
    }
}
