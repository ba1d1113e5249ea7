use std::process::ExitCode;
use std::time::Duration;

use clap::Args;
use tokio_util::sync::CancellationToken;
use vmforge::{ProvisionControl, ProvisionResponse, VmRequest};

use super::{print_failure, print_json};

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// VM name, unique on this host
    #[arg(long)]
    pub name: String,

    /// Owning user identity (user1, user2, user3)
    #[arg(long)]
    pub user: String,

    /// Number of vCPUs
    #[arg(long, default_value_t = 2)]
    pub cpu: u32,

    /// Memory in MB
    #[arg(long, default_value_t = 2048)]
    pub memory: u64,

    /// Root disk size in GB
    #[arg(long, default_value_t = 20)]
    pub disk: u64,

    /// Give up after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

pub async fn execute(args: CreateArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<ExitCode> {
    let manager = match global.create_manager() {
        Ok(manager) => manager,
        Err(e) => return print_failure(&e),
    };

    let token = CancellationToken::new();
    let mut control = ProvisionControl::new().with_token(token.clone());
    if let Some(secs) = args.timeout {
        control = control.with_timeout(Duration::from_secs(secs));
    }

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling provisioning");
            token.cancel();
        }
    });

    let request = VmRequest::new(args.name, args.user, args.cpu, args.memory, args.disk);
    let result = manager.create_and_start_with(request, control).await;
    interrupt.abort();

    match result {
        Ok(record) => {
            print_json(&ProvisionResponse::success(&record))?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => print_failure(&e),
    }
}
