//! Get-or-create of per-user isolation networks and lease lookup.

use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::Mutex;
use vmforge_shared::{NetworkError, VmforgeResult};

use super::{IsolationTag, UserIdentity, guest_mac, render_network_xml};
use crate::hypervisor::{IsolationSwitch, NetworkControl, NetworkInfo};
use crate::metrics::RuntimeMetricsStorage;

/// A resolved, active isolation network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IsolationNetwork {
    pub user: UserIdentity,
    pub tag: IsolationTag,
    pub name: String,
    pub bridge: String,
    /// Subnet in CIDR notation.
    pub subnet: String,
    pub active: bool,
    /// True when this call defined the network rather than reusing it.
    #[serde(skip)]
    pub created: bool,
}

/// Ensures each user's isolation network exists and is active.
///
/// Resolution for one user is serialized through a per-user lock, so two
/// concurrent requests never both define the same network. Different users
/// never contend.
pub struct NetworkProvisioner {
    uri: String,
    control: Arc<dyn NetworkControl>,
    switch: Arc<dyn IsolationSwitch>,
    locks: [Mutex<()>; UserIdentity::COUNT],
    metrics: RuntimeMetricsStorage,
}

impl NetworkProvisioner {
    pub fn new(
        uri: impl Into<String>,
        control: Arc<dyn NetworkControl>,
        switch: Arc<dyn IsolationSwitch>,
        metrics: RuntimeMetricsStorage,
    ) -> Self {
        Self {
            uri: uri.into(),
            control,
            switch,
            locks: std::array::from_fn(|_| Mutex::new(())),
            metrics,
        }
    }

    /// Resolve the network of a user given by name.
    ///
    /// Unknown names fail with [`NetworkError::InvalidNetworkConfig`] before
    /// any control plane call.
    pub async fn resolve_network_for(&self, user: &str) -> VmforgeResult<IsolationNetwork> {
        let user: UserIdentity =
            user.parse()
                .map_err(|_| NetworkError::InvalidNetworkConfig {
                    value: user.to_string(),
                    reason: "not a known user identity".to_string(),
                })?;
        self.resolve_network(user).await
    }

    /// Get-or-create the isolation network of `user`.
    ///
    /// An active network is reused untouched; an inactive one is started; an
    /// absent one is defined, started and marked autostart.
    pub async fn resolve_network(&self, user: UserIdentity) -> VmforgeResult<IsolationNetwork> {
        let tag = user.isolation_tag();
        let name = tag.network_name();
        let bridge = tag.bridge_name();

        let _guard = self.locks[user.index()].lock().await;

        let existing = self.lookup(&name).await?;

        let created = match existing {
            Some(info) if info.active => {
                tracing::debug!(network = %name, user = %user, "Reusing active isolation network");
                false
            }
            Some(_) => {
                tracing::info!(network = %name, user = %user, "Starting inactive isolation network");
                self.start(&name).await?;
                false
            }
            None => {
                tracing::info!(
                    network = %name,
                    user = %user,
                    isolation_tag = %tag,
                    subnet = %tag.cidr(),
                    "Defining isolation network"
                );
                match self.control.define_network(&render_network_xml(tag)).await {
                    Ok(()) => {
                        RuntimeMetricsStorage::inc(&self.metrics.networks_defined);
                        self.start(&name).await?;
                        if let Err(e) = self.control.set_network_autostart(&name).await {
                            tracing::warn!(network = %name, error = %e, "Failed to mark network autostart");
                        }
                        true
                    }
                    Err(e) if !e.is_unreachable() => {
                        // Another process may have defined it since the lookup.
                        match self.lookup(&name).await? {
                            Some(info) => {
                                tracing::info!(
                                    network = %name,
                                    user = %user,
                                    "Isolation network defined concurrently, adopting it"
                                );
                                if !info.active {
                                    self.start(&name).await?;
                                }
                                false
                            }
                            None => {
                                return Err(NetworkError::NetworkDefineFailed {
                                    network_name: name,
                                    libvirt_error: e.message().to_string(),
                                }
                                .into());
                            }
                        }
                    }
                    Err(e) => {
                        return Err(e.into_typed(&self.uri, |libvirt_error| {
                            NetworkError::NetworkDefineFailed {
                                network_name: name.clone(),
                                libvirt_error,
                            }
                        }));
                    }
                }
            }
        };

        self.switch
            .enforce(&bridge, tag)
            .await
            .map_err(|e| NetworkError::NetworkStartFailed {
                network_name: name.clone(),
                libvirt_error: e.output(),
            })?;

        Ok(IsolationNetwork {
            user,
            tag,
            name,
            bridge,
            subnet: tag.cidr(),
            active: true,
            created,
        })
    }

    async fn lookup(&self, name: &str) -> VmforgeResult<Option<NetworkInfo>> {
        self.control.lookup_network(name).await.map_err(|e| {
            e.into_typed(&self.uri, |libvirt_error| NetworkError::NetworkDefineFailed {
                network_name: name.to_string(),
                libvirt_error,
            })
        })
    }

    /// Start `name`, accepting a rejection if the network is active anyway
    /// because another process started it first.
    async fn start(&self, name: &str) -> VmforgeResult<()> {
        let err = match self.control.start_network(name).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if !err.is_unreachable()
            && let Ok(Some(info)) = self.control.lookup_network(name).await
            && info.active
        {
            tracing::debug!(network = %name, "Isolation network started concurrently");
            return Ok(());
        }
        Err(err.into_typed(&self.uri, |libvirt_error| NetworkError::NetworkStartFailed {
            network_name: name.to_string(),
            libvirt_error,
        }))
    }

    /// One lease query for the guest named `vm_name` on `network_name`.
    ///
    /// The guest is matched by hostname or by its derived MAC. Lease
    /// assignment trails domain start, so callers retry
    /// [`NetworkError::IpAddressNotFound`] with backoff.
    pub async fn address_for(&self, vm_name: &str, network_name: &str) -> VmforgeResult<Ipv4Addr> {
        let leases = self.control.list_leases(network_name).await.map_err(|e| {
            e.into_typed(&self.uri, |libvirt_error| NetworkError::DhcpLeaseFailed {
                network_name: network_name.to_string(),
                libvirt_error,
            })
        })?;

        let mac = guest_mac(vm_name);
        leases
            .iter()
            .find(|lease| lease.matches(vm_name, &mac))
            .map(|lease| lease.ip)
            .ok_or_else(|| {
                NetworkError::IpAddressNotFound {
                    vm_name: vm_name.to_string(),
                    network_name: network_name.to_string(),
                }
                .into()
            })
    }
}

impl std::fmt::Debug for NetworkProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkProvisioner")
            .field("uri", &self.uri)
            .field("switch", &self.switch.name())
            .finish()
    }
}
