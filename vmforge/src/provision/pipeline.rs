//! Sequential execution of provisioning stages.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use vmforge_shared::{VmforgeError, VmforgeResult};

use super::stages::{
    AddressTask, CredentialsTask, DomainTask, NetworkTask, PreflightTask, SeedTask, StorageTask,
    ValidateTask,
};
use super::{ProvisionContext, ProvisionControl, ProvisionServices};
use crate::runtime::options::RollbackPolicy;
use crate::vm::{VmRecord, VmRequest};

/// One step of a provisioning pass.
#[async_trait]
pub trait PipelineTask: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &mut ProvisionContext) -> VmforgeResult<()>;
}

/// Runs validate → preflight → network → credentials → seed → storage →
/// domain → address for a single request.
pub struct ProvisionPipeline {
    services: Arc<ProvisionServices>,
    control: ProvisionControl,
}

impl ProvisionPipeline {
    pub fn new(services: Arc<ProvisionServices>, control: ProvisionControl) -> Self {
        Self { services, control }
    }

    /// Interruptible stages come first; the address stage always runs once
    /// the domain is up.
    fn tasks(&self) -> (Vec<Box<dyn PipelineTask>>, Box<dyn PipelineTask>) {
        let interruptible: Vec<Box<dyn PipelineTask>> = vec![
            Box::new(ValidateTask),
            Box::new(PreflightTask),
            Box::new(NetworkTask),
            Box::new(CredentialsTask),
            Box::new(SeedTask),
            Box::new(StorageTask),
            Box::new(DomainTask),
        ];
        (interruptible, Box::new(AddressTask::new(self.control.clone())))
    }

    /// Provision and launch the VM described by `request`.
    ///
    /// The returned record carries the generated secret; the copy kept in the
    /// registry does not.
    pub async fn run(self, request: VmRequest) -> VmforgeResult<VmRecord> {
        let started = Instant::now();
        let mut ctx = ProvisionContext::new(self.services.clone(), request);
        let (interruptible, address) = self.tasks();

        for task in &interruptible {
            let stage = task.name();
            let result = match self.control.check(stage) {
                Ok(()) => run_task(task.as_ref(), &mut ctx).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                self.fail(ctx, stage, &e).await;
                return Err(e);
            }
        }

        // Only the address stage remains and it does not fail the pass.
        if let Err(e) = run_task(address.as_ref(), &mut ctx).await {
            tracing::warn!(vm_name = %ctx.vm_name(), error = %e, "Address stage failed");
        }

        let record = ctx
            .record
            .take()
            .ok_or_else(|| VmforgeError::Internal("validate stage produced no record".into()))?;

        tracing::info!(
            vm_name = %record.name(),
            network = record.network.as_deref().unwrap_or(""),
            address = ?record.address(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "VM provisioned"
        );
        Ok(record)
    }

    /// Undo side effects according to the rollback policy, then let the
    /// cleanup guard mark the record failed.
    async fn fail(&self, mut ctx: ProvisionContext, stage: &'static str, error: &VmforgeError) {
        let vm_name = ctx.vm_name().to_string();
        tracing::error!(
            vm_name = %vm_name,
            stage,
            code = error.code_name(),
            "Provisioning failed: {}",
            error.message()
        );

        // Only a defined domain is worth inspecting; without one, kept volumes
        // would just block a retry under the same name.
        let preserve = ctx.guard.domain_defined()
            && self.services.options.rollback == RollbackPolicy::Preserve;

        let mut volumes: Vec<_> = ctx.disk.take().into_iter().collect();
        volumes.extend(ctx.seed_volume.take());

        if preserve {
            for disk in volumes.iter_mut() {
                disk.persist();
            }
            tracing::warn!(
                vm_name = %vm_name,
                "Rollback disabled, leaving domain and volumes in place"
            );
        } else {
            if ctx.guard.domain_defined() {
                self.services.domains.undefine(&vm_name).await;
                ctx.guard.set_domain_defined(false);
            }
            self.services.storage.discard(volumes).await;
        }

        drop(ctx);
    }
}

async fn run_task(task: &dyn PipelineTask, ctx: &mut ProvisionContext) -> VmforgeResult<()> {
    let stage = task.name();
    let span = tracing::info_span!("stage", stage, vm_name = %ctx.vm_name());
    let started = Instant::now();

    async {
        tracing::debug!("Stage started");
        let result = task.run(ctx).await;
        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Stage finished"
        );
        result
    }
    .instrument(span)
    .await
}
