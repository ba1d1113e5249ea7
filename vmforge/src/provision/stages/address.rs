//! Stage: poll for the guest's address lease.
//!
//! Never fails the pass: the domain is already running, so exhausting the
//! retry budget leaves the address pending.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use tokio::time::Instant;
use vmforge_shared::VmforgeResult;

use super::require_mut;
use crate::metrics::RuntimeMetricsStorage;
use crate::net::NetworkProvisioner;
use crate::provision::pipeline::PipelineTask;
use crate::provision::{ProvisionContext, ProvisionControl};
use crate::runtime::options::LeasePollPolicy;
use crate::vm::PendingReason;

pub struct AddressTask {
    control: ProvisionControl,
}

impl AddressTask {
    pub fn new(control: ProvisionControl) -> Self {
        Self { control }
    }
}

#[async_trait]
impl PipelineTask for AddressTask {
    fn name(&self) -> &'static str {
        "address"
    }

    async fn run(&self, ctx: &mut ProvisionContext) -> VmforgeResult<()> {
        let services = ctx.services.clone();
        let network_name = match ctx.network.as_ref() {
            Some(network) => network.name.clone(),
            None => return Ok(()),
        };
        let record = require_mut(&mut ctx.record, "validate")?;
        let vm_name = record.name().to_string();

        match poll_address(
            &services.network,
            &vm_name,
            &network_name,
            &services.options.lease_poll,
            &self.control,
        )
        .await
        {
            Ok(address) => {
                tracing::info!(vm_name = %vm_name, address = %address, "Guest address resolved");
                record.set_address(address)?;
            }
            Err(reason) => {
                tracing::warn!(
                    vm_name = %vm_name,
                    network = %network_name,
                    reason = ?reason,
                    "Guest address still pending"
                );
                record.mark_address_pending(reason);
                RuntimeMetricsStorage::inc(&services.metrics.addresses_pending);
            }
        }

        services.registry.update(record);
        Ok(())
    }
}

/// Query leases with bounded exponential backoff.
///
/// Stops after `policy.max_attempts` queries, once `policy.deadline()` has
/// elapsed, or when `control` is interrupted, whichever comes first.
pub async fn poll_address(
    network: &NetworkProvisioner,
    vm_name: &str,
    network_name: &str,
    policy: &LeasePollPolicy,
    control: &ProvisionControl,
) -> Result<Ipv4Addr, PendingReason> {
    let started = Instant::now();

    for attempt in 1..=policy.max_attempts {
        if control.is_cancelled() {
            return Err(PendingReason::Cancelled);
        }
        if control.deadline_passed() {
            return Err(PendingReason::DeadlineExceeded);
        }

        match network.address_for(vm_name, network_name).await {
            Ok(address) => return Ok(address),
            Err(e) => tracing::debug!(
                vm_name = %vm_name,
                attempt,
                code = e.code_name(),
                "Address lease not available yet"
            ),
        }

        if attempt == policy.max_attempts {
            break;
        }

        let delay = policy.delay_after(attempt);
        if started.elapsed() + delay > policy.deadline() {
            return Err(PendingReason::DeadlineExceeded);
        }

        tokio::select! {
            reason = control.interrupted() => return Err(reason),
            _ = tokio::time::sleep(delay) => {}
        }
    }

    Err(PendingReason::RetriesExhausted)
}
