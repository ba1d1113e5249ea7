//! Stage: define and start the domain.
//!
//! The last stage that can fail the pass. On success the volumes become
//! permanent and the cleanup guard is disarmed.

use async_trait::async_trait;
use vmforge_shared::VmforgeResult;

use super::{require, require_mut};
use crate::metrics::RuntimeMetricsStorage;
use crate::provision::ProvisionContext;
use crate::provision::pipeline::PipelineTask;
use crate::vm::VmStatus;

pub struct DomainTask;

#[async_trait]
impl PipelineTask for DomainTask {
    fn name(&self) -> &'static str {
        "domain"
    }

    async fn run(&self, ctx: &mut ProvisionContext) -> VmforgeResult<()> {
        let services = ctx.services.clone();

        {
            let record = require(&ctx.record, "validate")?;
            let disk = require(&ctx.disk, "storage")?;
            let seed = require(&ctx.seed_volume, "storage")?;
            let network = require(&ctx.network, "network")?;
            services.domains.define(record, disk, seed, network).await?;
        }
        ctx.guard.set_domain_defined(true);

        let record = require_mut(&mut ctx.record, "validate")?;
        services.domains.start(record.name().as_str()).await?;
        record.transition_to(VmStatus::Running)?;

        if let Some(disk) = ctx.disk.as_mut() {
            disk.persist();
        }
        if let Some(seed) = ctx.seed_volume.as_mut() {
            seed.persist();
        }
        ctx.guard.disarm();

        services.registry.update(record);
        RuntimeMetricsStorage::inc(&services.metrics.vms_created);
        Ok(())
    }
}
