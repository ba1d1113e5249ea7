//! vmforge - per-user isolated VM provisioning on a libvirt host.
//!
//! One call to [`VmManager::create_and_start`] resolves the owner's isolation
//! network, generates guest credentials, renders the first-boot seed, derives
//! the root disk from a golden image, defines and starts the domain and
//! polls for its address lease.

pub mod api;
pub mod credentials;
pub mod disk;
pub mod domain;
pub mod hypervisor;
pub mod management;
pub mod metrics;
pub mod net;
pub mod provision;
pub mod runtime;
pub mod seed;
pub mod storage;
pub mod util;
pub mod vm;

pub use api::ProvisionResponse;
pub use hypervisor::Backends;
pub use net::{IsolationTag, UserIdentity};
pub use provision::ProvisionControl;
pub use runtime::VmManager;
pub use runtime::options::{
    HomeLockMode, LeasePollPolicy, ResourceLimits, RollbackPolicy, VmforgeOptions,
    VmforgeOptionsBuilder,
};
pub use util::init_logging_for;
pub use vm::{AddressResolution, PendingReason, VmName, VmRecord, VmRequest, VmStatus};
pub use vmforge_shared::{VmforgeError, VmforgeResult};
