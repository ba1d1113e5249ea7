//! Stage: control plane reachability and duplicate domain check.

use async_trait::async_trait;
use vmforge_shared::{ConnectionError, DomainError, VmforgeResult};

use super::require;
use crate::provision::ProvisionContext;
use crate::provision::pipeline::PipelineTask;

pub struct PreflightTask;

#[async_trait]
impl PipelineTask for PreflightTask {
    fn name(&self) -> &'static str {
        "preflight"
    }

    async fn run(&self, ctx: &mut ProvisionContext) -> VmforgeResult<()> {
        let services = &ctx.services;
        let spec = require(&ctx.spec, "validate")?;

        services
            .control_plane
            .ping()
            .await
            .map_err(|e| ConnectionError::Unreachable {
                uri: services.control_plane.uri().to_string(),
                error: e.message().to_string(),
            })?;

        if services.domains.exists(spec.name.as_str()).await? {
            return Err(DomainError::AlreadyExists {
                domain: spec.name.to_string(),
            }
            .into());
        }

        Ok(())
    }
}
