//! External subsystem abstractions.
//!
//! The orchestrator never talks to a concrete client. Each external
//! subsystem is reached through a narrow capability trait so that tests can
//! substitute in-memory doubles:
//!
//! ```text
//! ControlPlane = Connection + NetworkControl + StoragePoolControl + DomainControl
//! DiskCloner      (golden image -> per-VM volume)
//! SeedPackager    (seed documents -> mountable seed image)
//! IsolationSwitch (per-tag traffic isolation on multi-host deployments)
//! ```
//!
//! Concrete implementations drive the usual host tools: `virsh`, `qemu-img`,
//! `genisoimage` and `ovs-vsctl`.

mod packager;
mod qemu_img;
mod switch;
mod types;
mod virsh;

pub use packager::GenIsoImage;
pub use qemu_img::QemuImg;
pub use switch::{NoSwitch, OvsVsctl, SwitchMode};
pub use types::{Lease, NetworkInfo, PoolInfo};
pub use virsh::VirshControlPlane;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use vmforge_shared::{ConnectionError, VmforgeError};

use crate::net::IsolationTag;
use crate::util::process::ToolError;

/// Failure reported by the control plane.
#[derive(Debug, Clone, Error)]
pub enum ControlPlaneError {
    /// The control plane could not be reached at all.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The control plane answered and refused the request.
    #[error("{0}")]
    Rejected(String),
}

impl ControlPlaneError {
    /// Raw subsystem text.
    pub fn message(&self) -> &str {
        match self {
            ControlPlaneError::Unreachable(msg) | ControlPlaneError::Rejected(msg) => msg,
        }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, ControlPlaneError::Unreachable(_))
    }

    /// Translate into a typed failure.
    ///
    /// `Unreachable` always becomes [`ConnectionError::Unreachable`]; a
    /// rejection is handed to `rejected` with the raw subsystem text.
    pub(crate) fn into_typed<E>(self, uri: &str, rejected: impl FnOnce(String) -> E) -> VmforgeError
    where
        E: Into<VmforgeError>,
    {
        match self {
            ControlPlaneError::Unreachable(error) => ConnectionError::Unreachable {
                uri: uri.to_string(),
                error,
            }
            .into(),
            ControlPlaneError::Rejected(text) => rejected(text).into(),
        }
    }
}

pub type ControlPlaneResult<T> = Result<T, ControlPlaneError>;

/// Connection to the control plane.
#[async_trait]
pub trait Connection: Send + Sync {
    /// URI the control plane is reached through.
    fn uri(&self) -> &str;

    /// Verify the control plane answers.
    async fn ping(&self) -> ControlPlaneResult<()>;
}

/// Virtual network capability.
#[async_trait]
pub trait NetworkControl: Send + Sync {
    /// Look up a network by name. `None` when it is not defined.
    async fn lookup_network(&self, name: &str) -> ControlPlaneResult<Option<NetworkInfo>>;

    /// Persistently define a network from its XML description.
    async fn define_network(&self, xml: &str) -> ControlPlaneResult<()>;

    /// Activate a defined network.
    async fn start_network(&self, name: &str) -> ControlPlaneResult<()>;

    /// Mark a network to be activated on host boot.
    async fn set_network_autostart(&self, name: &str) -> ControlPlaneResult<()>;

    /// Active DHCP leases of a network.
    async fn list_leases(&self, network: &str) -> ControlPlaneResult<Vec<Lease>>;
}

/// Storage pool capability.
#[async_trait]
pub trait StoragePoolControl: Send + Sync {
    /// Look up a pool by name. `None` when it is not defined.
    async fn lookup_pool(&self, name: &str) -> ControlPlaneResult<Option<PoolInfo>>;

    /// Rescan the pool so new volume files become visible.
    async fn refresh_pool(&self, name: &str) -> ControlPlaneResult<()>;

    /// Delete a volume from a pool.
    async fn delete_volume(&self, pool: &str, volume: &str) -> ControlPlaneResult<()>;
}

/// Guest domain capability.
#[async_trait]
pub trait DomainControl: Send + Sync {
    async fn domain_exists(&self, name: &str) -> ControlPlaneResult<bool>;

    /// Persistently define a domain from its XML description.
    async fn define_domain(&self, xml: &str) -> ControlPlaneResult<()>;

    async fn start_domain(&self, name: &str) -> ControlPlaneResult<()>;

    /// Remove a (stopped) domain definition.
    async fn undefine_domain(&self, name: &str) -> ControlPlaneResult<()>;
}

/// Everything the orchestrator needs from the hypervisor control plane.
pub trait ControlPlane: Connection + NetworkControl + StoragePoolControl + DomainControl {}

impl<T> ControlPlane for T where T: Connection + NetworkControl + StoragePoolControl + DomainControl {}

/// Derives per-VM disk volumes from the golden base image.
#[async_trait]
pub trait DiskCloner: Send + Sync {
    /// Copy `base` into a standalone volume at `target` whose virtual size is
    /// at least `min_size_bytes`. `base` is never written.
    async fn clone_disk(&self, base: &Path, target: &Path, min_size_bytes: u64)
    -> Result<(), ToolError>;
}

/// Packages seed documents into a mountable image.
#[async_trait]
pub trait SeedPackager: Send + Sync {
    /// Build `output` from `inputs`. The image label is fixed by the packager.
    async fn package(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ToolError>;
}

/// Enforces inter-tag traffic isolation on an external software switch.
#[async_trait]
pub trait IsolationSwitch: Send + Sync {
    fn name(&self) -> &'static str;

    /// Make sure traffic on `bridge` is confined to `tag`.
    async fn enforce(&self, bridge: &str, tag: IsolationTag) -> Result<(), ToolError>;
}

/// The set of external collaborators a manager drives.
#[derive(Clone)]
pub struct Backends {
    pub control_plane: Arc<dyn ControlPlane>,
    pub disk_cloner: Arc<dyn DiskCloner>,
    pub seed_packager: Arc<dyn SeedPackager>,
    pub switch: Arc<dyn IsolationSwitch>,
}

impl Backends {
    /// Host tooling: `virsh` at `uri`, `qemu-img`, `genisoimage`.
    pub fn host(uri: &str, switch_mode: SwitchMode) -> Self {
        let switch: Arc<dyn IsolationSwitch> = match switch_mode {
            SwitchMode::None => Arc::new(NoSwitch),
            SwitchMode::OpenVswitch => Arc::new(OvsVsctl::default()),
        };

        Self {
            control_plane: Arc::new(VirshControlPlane::new(uri)),
            disk_cloner: Arc::new(QemuImg::default()),
            seed_packager: Arc::new(GenIsoImage::default()),
            switch,
        }
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("control_plane", &self.control_plane.uri())
            .field("switch", &self.switch.name())
            .finish()
    }
}
