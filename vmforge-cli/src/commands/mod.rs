pub mod address;
pub mod create;
pub mod network;

use std::process::ExitCode;

use serde::Serialize;
use vmforge::ProvisionResponse;
use vmforge::VmforgeError;

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print the failure shape and map it to exit status 1.
pub fn print_failure(error: &VmforgeError) -> anyhow::Result<ExitCode> {
    tracing::debug!(code = error.code_name(), "command failed");
    print_json(&ProvisionResponse::failure(error))?;
    Ok(ExitCode::from(1))
}
