use std::sync::Arc;
use vmforge_shared::{DomainError, VmforgeResult};

use super::DomainXmlBuilder;
use crate::disk::Disk;
use crate::hypervisor::DomainControl;
use crate::net::{IsolationNetwork, guest_mac};
use crate::vm::VmRecord;

/// Defines and starts guest domains.
///
/// Performs no cleanup of its own: a domain whose start was rejected stays
/// defined until the caller decides what to do with it.
pub struct DomainLauncher {
    uri: String,
    control: Arc<dyn DomainControl>,
}

impl DomainLauncher {
    pub fn new(uri: impl Into<String>, control: Arc<dyn DomainControl>) -> Self {
        Self {
            uri: uri.into(),
            control,
        }
    }

    pub async fn exists(&self, name: &str) -> VmforgeResult<bool> {
        self.control.domain_exists(name).await.map_err(|e| {
            e.into_typed(&self.uri, |libvirt_error| DomainError::LookupFailed {
                domain: name.to_string(),
                libvirt_error,
            })
        })
    }

    /// Render the domain description for `record`.
    pub fn render(
        &self,
        record: &VmRecord,
        disk: &Disk,
        seed: &Disk,
        network: &IsolationNetwork,
    ) -> VmforgeResult<String> {
        let name = record.name().as_str();
        DomainXmlBuilder::new()
            .with_name(name)
            .with_vcpus(record.cpus)
            .with_memory_mib(record.memory_mb)
            .with_root_disk(disk.path())
            .with_seed_disk(seed.path())
            .with_network(&network.name, &guest_mac(name))
            .build_xml()
    }

    /// Persistently define the domain.
    ///
    /// A name already known to the control plane is
    /// [`DomainError::AlreadyExists`]; any other rejection is
    /// [`DomainError::DefineFailed`].
    pub async fn define(
        &self,
        record: &VmRecord,
        disk: &Disk,
        seed: &Disk,
        network: &IsolationNetwork,
    ) -> VmforgeResult<()> {
        let name = record.name().as_str();
        if self.exists(name).await? {
            return Err(DomainError::AlreadyExists {
                domain: name.to_string(),
            }
            .into());
        }

        let xml = self.render(record, disk, seed, network)?;
        self.control.define_domain(&xml).await.map_err(|e| {
            e.into_typed(&self.uri, |libvirt_error| {
                if libvirt_error.contains("already exists") {
                    DomainError::AlreadyExists {
                        domain: name.to_string(),
                    }
                } else {
                    DomainError::DefineFailed {
                        domain: name.to_string(),
                        libvirt_error,
                    }
                }
            })
        })?;

        tracing::info!(vm_name = %name, network = %network.name, "Domain defined");
        Ok(())
    }

    pub async fn start(&self, name: &str) -> VmforgeResult<()> {
        self.control.start_domain(name).await.map_err(|e| {
            e.into_typed(&self.uri, |libvirt_error| DomainError::StartFailed {
                domain: name.to_string(),
                libvirt_error,
            })
        })?;
        tracing::info!(vm_name = %name, "Domain started");
        Ok(())
    }

    /// Best-effort removal of a domain definition.
    pub async fn undefine(&self, name: &str) {
        match self.control.undefine_domain(name).await {
            Ok(()) => tracing::info!(vm_name = %name, "Domain undefined"),
            Err(e) => tracing::warn!(vm_name = %name, error = %e, "Failed to undefine domain"),
        }
    }
}

impl std::fmt::Debug for DomainLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainLauncher").field("uri", &self.uri).finish()
    }
}
