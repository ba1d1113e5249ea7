//! Stage: resolve the owner's isolation network.

use async_trait::async_trait;
use vmforge_shared::VmforgeResult;

use super::{require, require_mut};
use crate::provision::ProvisionContext;
use crate::provision::pipeline::PipelineTask;

pub struct NetworkTask;

#[async_trait]
impl PipelineTask for NetworkTask {
    fn name(&self) -> &'static str {
        "network"
    }

    async fn run(&self, ctx: &mut ProvisionContext) -> VmforgeResult<()> {
        let user = require(&ctx.spec, "validate")?.user;
        let network = ctx.services.network.resolve_network(user).await?;

        require_mut(&mut ctx.record, "validate")?.network = Some(network.name.clone());
        ctx.network = Some(network);
        Ok(())
    }
}
