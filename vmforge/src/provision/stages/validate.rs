//! Stage: request validation and name reservation.
//!
//! Makes no external calls.

use async_trait::async_trait;
use vmforge_shared::VmforgeResult;

use crate::provision::ProvisionContext;
use crate::provision::pipeline::PipelineTask;
use crate::vm::VmRecord;

pub struct ValidateTask;

#[async_trait]
impl PipelineTask for ValidateTask {
    fn name(&self) -> &'static str {
        "validate"
    }

    async fn run(&self, ctx: &mut ProvisionContext) -> VmforgeResult<()> {
        let options = &ctx.services.options;
        let spec = ctx.request.validate(&options.resource_limits)?;
        let record = VmRecord::new(&spec, options.guest_username.clone());

        ctx.services.registry.reserve(&record)?;
        ctx.guard.set_vm(spec.name.clone());

        tracing::info!(
            vm_name = %spec.name,
            user = %spec.user,
            isolation_tag = %record.isolation_tag(),
            cpus = spec.cpus,
            memory_mb = spec.memory_mb,
            disk_gb = spec.disk_gb,
            "Request validated"
        );

        ctx.spec = Some(spec);
        ctx.record = Some(record);
        Ok(())
    }
}
