use std::process::ExitCode;

use clap::Args;
use serde_json::json;
use vmforge::{UserIdentity, VmforgeError};

use super::{print_failure, print_json};

#[derive(Args, Debug)]
pub struct AddressArgs {
    /// VM name
    pub name: String,

    /// Owning user identity; selects the isolation network
    #[arg(long)]
    pub user: String,
}

pub async fn execute(args: AddressArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<ExitCode> {
    let user: UserIdentity = match args.user.parse() {
        Ok(user) => user,
        Err(e) => return print_failure(&VmforgeError::from(e)),
    };
    let network = user.isolation_tag().network_name();

    let manager = match global.create_manager() {
        Ok(manager) => manager,
        Err(e) => return print_failure(&e),
    };
    match manager.lookup_address(&args.name, &network).await {
        Ok(address) => {
            print_json(&json!({
                "success": true,
                "name": args.name,
                "network": network,
                "address": address.to_string(),
            }))?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => print_failure(&e),
    }
}
