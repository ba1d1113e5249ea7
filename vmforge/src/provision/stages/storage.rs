//! Stage: root disk and seed volume.

use async_trait::async_trait;
use vmforge_shared::VmforgeResult;

use super::require;
use crate::provision::ProvisionContext;
use crate::provision::pipeline::PipelineTask;

pub struct StorageTask;

#[async_trait]
impl PipelineTask for StorageTask {
    fn name(&self) -> &'static str {
        "storage"
    }

    async fn run(&self, ctx: &mut ProvisionContext) -> VmforgeResult<()> {
        let storage = &ctx.services.storage;
        let spec = require(&ctx.spec, "validate")?;
        let seed_image = require(&ctx.seed_image, "seed")?;
        let name = spec.name.as_str();

        let disk = storage.provision_disk(name, spec.disk_gb).await?;
        ctx.disk = Some(disk);

        let seed_volume = storage.provision_seed_volume(name, seed_image).await?;
        ctx.seed_volume = Some(seed_volume);
        ctx.guard.clear_staged_seed();
        Ok(())
    }
}
