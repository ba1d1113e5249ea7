use std::process::ExitCode;

use clap::Args;
use serde_json::json;

use super::{print_failure, print_json};

#[derive(Args, Debug)]
pub struct NetworkArgs {
    /// User identity whose network to resolve
    #[arg(long)]
    pub user: String,
}

pub async fn execute(args: NetworkArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<ExitCode> {
    let manager = match global.create_manager() {
        Ok(manager) => manager,
        Err(e) => return print_failure(&e),
    };

    match manager.resolve_network(&args.user).await {
        Ok(network) => {
            print_json(&json!({ "success": true, "network": network }))?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => print_failure(&e),
    }
}
