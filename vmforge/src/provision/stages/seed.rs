//! Stage: render and package the first-boot seed.

use async_trait::async_trait;
use vmforge_shared::VmforgeResult;

use super::require;
use crate::provision::ProvisionContext;
use crate::provision::pipeline::PipelineTask;

pub struct SeedTask;

#[async_trait]
impl PipelineTask for SeedTask {
    fn name(&self) -> &'static str {
        "seed"
    }

    async fn run(&self, ctx: &mut ProvisionContext) -> VmforgeResult<()> {
        let record = require(&ctx.record, "validate")?;
        let image = ctx
            .services
            .seeds
            .build_seed(record.name().as_str(), &record.username, record.secret())
            .await?;

        ctx.guard.set_staged_seed(image.clone());
        ctx.seed_image = Some(image);
        Ok(())
    }
}
