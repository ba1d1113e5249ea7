//! Stage: generate the guest secret.

use async_trait::async_trait;
use vmforge_shared::VmforgeResult;

use super::require_mut;
use crate::credentials::generate_secret;
use crate::provision::ProvisionContext;
use crate::provision::pipeline::PipelineTask;

pub struct CredentialsTask;

#[async_trait]
impl PipelineTask for CredentialsTask {
    fn name(&self) -> &'static str {
        "credentials"
    }

    async fn run(&self, ctx: &mut ProvisionContext) -> VmforgeResult<()> {
        let secret = generate_secret(ctx.services.options.secret_length);
        let record = require_mut(&mut ctx.record, "validate")?;
        record.set_secret(secret)?;
        tracing::debug!(vm_name = %record.name(), "Guest secret generated");
        Ok(())
    }
}
