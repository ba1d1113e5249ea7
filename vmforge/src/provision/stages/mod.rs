//! Provisioning stages.
//!
//! Each stage does one thing: it reads what earlier stages left in the
//! [`ProvisionContext`](super::ProvisionContext) and stores its own output there.

mod address;
mod credentials;
mod domain;
mod network;
mod preflight;
mod seed;
mod storage;
mod validate;

pub use address::{AddressTask, poll_address};
pub use credentials::CredentialsTask;
pub use domain::DomainTask;
pub use network::NetworkTask;
pub use preflight::PreflightTask;
pub use seed::SeedTask;
pub use storage::StorageTask;
pub use validate::ValidateTask;

use vmforge_shared::{VmforgeError, VmforgeResult};

/// Borrow an earlier stage's output.
fn require<'a, T>(value: &'a Option<T>, stage: &str) -> VmforgeResult<&'a T> {
    value
        .as_ref()
        .ok_or_else(|| VmforgeError::Internal(format!("{} stage must run first", stage)))
}

/// Mutably borrow an earlier stage's output.
fn require_mut<'a, T>(value: &'a mut Option<T>, stage: &str) -> VmforgeResult<&'a mut T> {
    value
        .as_mut()
        .ok_or_else(|| VmforgeError::Internal(format!("{} stage must run first", stage)))
}
