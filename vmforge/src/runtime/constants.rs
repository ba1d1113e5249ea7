//! Constants for the vmforge runtime.
//!
//! Network and seed constants live in `vmforge-shared` and are re-exported here.

pub use vmforge_shared::constants::{network, seed};

pub mod envs {
    pub const VMFORGE_HOME: &str = "VMFORGE_HOME";
}

/// Control plane and host defaults.
pub mod host_defaults {
    /// Local system hypervisor connection.
    pub const LIBVIRT_URI: &str = "qemu:///system";

    /// Storage pool derived volumes are placed in.
    pub const STORAGE_POOL: &str = "default";

    /// Golden base image all guest disks derive from.
    pub const BASE_IMAGE: &str = "/var/lib/libvirt/images/vmforge-base.qcow2";
}

/// Guest defaults.
pub mod guest_defaults {
    /// Administrative user created on first boot.
    pub const USERNAME: &str = "ubuntu";

    /// Length of generated guest secrets.
    pub const SECRET_LENGTH: usize = 16;

    /// Generated secrets are never shorter than this.
    pub const MIN_SECRET_LENGTH: usize = 16;
}

/// Resource bounds accepted for a single VM.
pub mod limits {
    pub const MIN_CPUS: u32 = 1;
    pub const MAX_CPUS: u32 = 16;

    pub const MIN_MEMORY_MB: u64 = 512;
    pub const MAX_MEMORY_MB: u64 = 65536;

    pub const MIN_DISK_GB: u64 = 10;
    pub const MAX_DISK_GB: u64 = 500;

    /// Longest accepted VM name (fits a DNS label).
    pub const MAX_NAME_LEN: usize = 63;
}

/// Address lease polling defaults.
pub mod lease_poll {
    pub const MAX_ATTEMPTS: u32 = 30;
    pub const INITIAL_DELAY_MS: u64 = 1000;
    pub const MAX_DELAY_MS: u64 = 10_000;
    pub const MULTIPLIER: u32 = 2;
    pub const DEADLINE_MS: u64 = 120_000;
}
