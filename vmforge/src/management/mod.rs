//! In-memory tracking of provisioned VMs.

mod registry;

pub use registry::VmRegistry;
