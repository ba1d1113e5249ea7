//! Type definitions for the provisioning pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use crate::credentials::Secret;
use crate::disk::Disk;
use crate::domain::DomainLauncher;
use crate::hypervisor::ControlPlane;
use crate::management::VmRegistry;
use crate::metrics::RuntimeMetricsStorage;
use crate::net::{IsolationNetwork, NetworkProvisioner};
use crate::runtime::options::VmforgeOptions;
use crate::seed::SeedBuilder;
use crate::storage::StorageProvisioner;
use crate::vm::{VmName, VmRecord, VmRequest, VmSpec, VmStatus};

/// Long-lived collaborators shared by every provisioning pass.
pub struct ProvisionServices {
    pub options: VmforgeOptions,
    pub control_plane: Arc<dyn ControlPlane>,
    pub network: NetworkProvisioner,
    pub storage: StorageProvisioner,
    pub seeds: SeedBuilder,
    pub domains: DomainLauncher,
    pub registry: VmRegistry,
    pub metrics: RuntimeMetricsStorage,
}

/// RAII guard for cleanup when a provisioning pass does not complete.
///
/// On drop while armed: removes a staged seed image that never reached the
/// pool, marks the reserved record `failed` and counts the failure. Volume
/// files are `Disk`s held by the context and clean up after themselves.
pub struct CleanupGuard {
    registry: VmRegistry,
    metrics: RuntimeMetricsStorage,
    vm_name: Option<VmName>,
    staged_seed: Option<PathBuf>,
    domain_defined: bool,
    armed: bool,
}

impl CleanupGuard {
    pub fn new(registry: VmRegistry, metrics: RuntimeMetricsStorage) -> Self {
        Self {
            registry,
            metrics,
            vm_name: None,
            staged_seed: None,
            domain_defined: false,
            armed: true,
        }
    }

    /// Register the reserved name whose record is failed on cleanup.
    pub fn set_vm(&mut self, name: VmName) {
        self.vm_name = Some(name);
    }

    pub fn set_staged_seed(&mut self, path: PathBuf) {
        self.staged_seed = Some(path);
    }

    /// The staged seed was moved into the pool.
    pub fn clear_staged_seed(&mut self) {
        self.staged_seed = None;
    }

    pub fn set_domain_defined(&mut self, defined: bool) {
        self.domain_defined = defined;
    }

    pub fn domain_defined(&self) -> bool {
        self.domain_defined
    }

    /// Disarm the guard (call on success).
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        tracing::warn!(
            vm_name = self.vm_name.as_ref().map(|n| n.as_str()).unwrap_or("<unreserved>"),
            "Provisioning did not complete, cleaning up"
        );

        if let Some(ref path) = self.staged_seed
            && path.exists()
            && let Err(e) = std::fs::remove_file(path)
        {
            tracing::warn!("Failed to remove staged seed {}: {}", path.display(), e);
        }

        if self.domain_defined {
            tracing::warn!(
                vm_name = ?self.vm_name,
                "Domain left defined on the control plane"
            );
        }

        if let Some(ref name) = self.vm_name
            && let Some(mut record) = self.registry.get(name.as_str())
            && record.status() == VmStatus::Creating
        {
            if let Err(e) = record.transition_to(VmStatus::Failed) {
                tracing::warn!("Failed to mark record failed: {}", e);
            }
            self.registry.update(&record);
        }

        RuntimeMetricsStorage::inc(&self.metrics.vms_failed);
    }
}

/// Provisioning pass context.
///
/// Stages read earlier outputs and write their own into the `Option` fields.
pub struct ProvisionContext {
    pub services: Arc<ProvisionServices>,
    pub request: VmRequest,
    pub guard: CleanupGuard,

    pub spec: Option<VmSpec>,
    pub record: Option<VmRecord>,
    pub network: Option<IsolationNetwork>,
    pub seed_image: Option<PathBuf>,
    pub disk: Option<Disk>,
    pub seed_volume: Option<Disk>,
}

impl ProvisionContext {
    pub fn new(services: Arc<ProvisionServices>, request: VmRequest) -> Self {
        let guard = CleanupGuard::new(services.registry.clone(), services.metrics.clone());
        Self {
            services,
            request,
            guard,
            spec: None,
            record: None,
            network: None,
            seed_image: None,
            disk: None,
            seed_volume: None,
        }
    }

    /// Name for log fields, before or after validation.
    pub fn vm_name(&self) -> &str {
        self.record
            .as_ref()
            .map(|r| r.name().as_str())
            .unwrap_or(&self.request.name)
    }

    pub fn secret(&self) -> Option<&Secret> {
        self.record.as_ref().and_then(|r| r.secret())
    }
}
