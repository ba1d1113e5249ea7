//! Storage pool resolution and per-VM volume provisioning.

mod provisioner;

pub use provisioner::StorageProvisioner;
