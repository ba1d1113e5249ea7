//! VM records: the unit of work and the result of provisioning.

mod record;
mod request;
mod state;

pub use record::{AddressResolution, PendingReason, VmRecord};
pub use request::{VmName, VmRequest, VmSpec};
pub use state::VmStatus;
