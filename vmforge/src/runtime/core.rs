//! The provisioning manager.

use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::domain::DomainLauncher;
use crate::hypervisor::{Backends, ControlPlane};
use crate::init_logging_for;
use crate::management::VmRegistry;
use crate::metrics::{RuntimeMetrics, RuntimeMetricsStorage};
use crate::net::{IsolationNetwork, NetworkProvisioner};
use crate::provision::{ProvisionControl, ProvisionPipeline, ProvisionServices};
use crate::runtime::layout::FilesystemLayout;
use crate::runtime::lock::RuntimeLock;
use crate::runtime::options::VmforgeOptions;
use crate::seed::SeedBuilder;
use crate::storage::StorageProvisioner;
use crate::vm::{VmRecord, VmRequest};
use vmforge_shared::{VmforgeError, VmforgeResult};

/// Entry point for provisioning VMs on one host.
///
/// **Lock Behavior**: An exclusive manager is the only one on its home
/// directory; shared managers coexist with each other. The filesystem lock
/// is released when the last clone is dropped.
///
/// **Cloning**: Cheap; all clones share the registry, metrics and the
/// per-user network locks, so concurrent requests through clones are
/// serialized exactly like requests through one manager.
#[derive(Clone)]
pub struct VmManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    services: Arc<ProvisionServices>,
    layout: FilesystemLayout,
    _runtime_lock: RuntimeLock,
}

impl VmManager {
    /// Create a manager driving `backends` with `options`.
    ///
    /// **Prepare Before Execute**: options are validated, the home directory
    /// is prepared and locked before returning.
    ///
    /// # Errors
    ///
    /// - Options fail validation
    /// - The home directory cannot be created
    /// - Another manager holds the home directory in a conflicting mode
    pub fn new(options: VmforgeOptions, backends: Backends) -> VmforgeResult<Self> {
        options.sanitize()?;

        let layout = FilesystemLayout::new(options.home_dir.clone());
        layout.prepare()?;
        init_logging_for(&layout)?;

        let runtime_lock = RuntimeLock::acquire(layout.home_dir(), options.home_lock)?;

        let uri = options.libvirt_uri.clone();
        let metrics = RuntimeMetricsStorage::new();
        let control_plane: Arc<dyn ControlPlane> = backends.control_plane;

        let network = NetworkProvisioner::new(
            uri.clone(),
            control_plane.clone(),
            backends.switch,
            metrics.clone(),
        );
        let storage = StorageProvisioner::new(
            uri.clone(),
            control_plane.clone(),
            backends.disk_cloner,
            options.storage_pool.clone(),
            options.base_image.clone(),
        );
        let seeds = SeedBuilder::new(
            backends.seed_packager,
            options.scratch_root(),
            layout.seeds_dir(),
        );
        let domains = DomainLauncher::new(uri.clone(), control_plane.clone());

        let services = Arc::new(ProvisionServices {
            options,
            control_plane,
            network,
            storage,
            seeds,
            domains,
            registry: VmRegistry::new(),
            metrics,
        });

        tracing::debug!(
            home = %layout.home_dir().display(),
            uri = %uri,
            "initialized vm manager"
        );

        Ok(Self {
            inner: Arc::new(ManagerInner {
                services,
                layout,
                _runtime_lock: runtime_lock,
            }),
        })
    }

    /// Manager driving the host's `virsh`, `qemu-img` and `genisoimage`.
    pub fn with_virsh(options: VmforgeOptions) -> VmforgeResult<Self> {
        let backends = Backends::host(&options.libvirt_uri, options.switch_mode);
        Self::new(options, backends)
    }

    /// Provision and launch one VM.
    ///
    /// The returned record carries the generated secret. On failure every
    /// resource this call created is released, subject to the rollback policy.
    pub async fn create_and_start(&self, request: VmRequest) -> VmforgeResult<VmRecord> {
        self.create_and_start_with(request, ProvisionControl::new())
            .await
    }

    /// Like [`create_and_start`](Self::create_and_start), observing `control`
    /// for cancellation and deadline.
    pub async fn create_and_start_with(
        &self,
        request: VmRequest,
        control: ProvisionControl,
    ) -> VmforgeResult<VmRecord> {
        ProvisionPipeline::new(self.inner.services.clone(), control)
            .run(request)
            .await
    }

    /// Ensure the isolation network of `user` exists and is active.
    pub async fn resolve_network(&self, user: &str) -> VmforgeResult<IsolationNetwork> {
        self.inner.services.network.resolve_network_for(user).await
    }

    /// Look up the current lease of a provisioned VM.
    ///
    /// For VMs whose address was left pending by `create_and_start`.
    pub async fn address_for(&self, vm_name: &str) -> VmforgeResult<Ipv4Addr> {
        let services = &self.inner.services;
        let mut record = services
            .registry
            .get(vm_name)
            .ok_or_else(|| VmforgeError::Internal(format!("unknown vm: {}", vm_name)))?;

        if let Some(address) = record.address() {
            return Ok(address);
        }

        let network = record.network.clone().ok_or_else(|| {
            VmforgeError::Internal(format!("vm {} has no network attached", vm_name))
        })?;
        let address = services.network.address_for(vm_name, &network).await?;

        record.set_address(address)?;
        services.registry.update(&record);
        Ok(address)
    }

    /// One lease query for `vm_name` on `network_name`, without consulting
    /// the registry.
    pub async fn lookup_address(&self, vm_name: &str, network_name: &str) -> VmforgeResult<Ipv4Addr> {
        self.inner
            .services
            .network
            .address_for(vm_name, network_name)
            .await
    }

    /// Registry snapshot of one VM. Never carries the secret.
    pub fn get(&self, vm_name: &str) -> Option<VmRecord> {
        self.inner.services.registry.get(vm_name)
    }

    /// Registry snapshot of all VMs, oldest first.
    pub fn list(&self) -> Vec<VmRecord> {
        self.inner.services.registry.list()
    }

    pub fn metrics(&self) -> RuntimeMetrics {
        RuntimeMetrics::new(self.inner.services.metrics.clone())
    }

    pub fn options(&self) -> &VmforgeOptions {
        &self.inner.services.options
    }

    pub fn layout(&self) -> &FilesystemLayout {
        &self.inner.layout
    }

    /// Verify the control plane answers.
    pub async fn ping(&self) -> VmforgeResult<()> {
        let control_plane = &self.inner.services.control_plane;
        control_plane
            .ping()
            .await
            .map_err(|e| e.into_typed(control_plane.uri(), VmforgeError::Internal))
    }
}

impl std::fmt::Debug for VmManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmManager")
            .field("home_dir", &self.inner.layout.home_dir())
            .field("uri", &self.inner.services.options.libvirt_uri)
            .finish()
    }
}
