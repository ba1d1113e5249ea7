//! Volume naming and sizing constants.

/// Bytes per GiB, the unit requested disk sizes are given in.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Suffix of a VM's root disk volume.
pub const ROOT_DISK_SUFFIX: &str = ".qcow2";

/// Suffix of a VM's seed volume.
pub const SEED_VOLUME_SUFFIX: &str = "-seed.iso";

/// Root disk volume name for a VM.
pub fn root_volume_name(vm_name: &str) -> String {
    format!("{}{}", vm_name, ROOT_DISK_SUFFIX)
}

/// Seed volume name for a VM.
pub fn seed_volume_name(vm_name: &str) -> String {
    format!("{}{}", vm_name, SEED_VOLUME_SUFFIX)
}
