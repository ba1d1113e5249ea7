//! Per-user isolation networking.
//!
//! Each [`UserIdentity`] owns exactly one isolation network, derived from its
//! fixed [`IsolationTag`]:
//!
//! ```text
//! user1 -> tag 100 -> vmforge-net-100, virbr100, 192.168.100.0/24
//! user2 -> tag 101 -> vmforge-net-101, virbr101, 192.168.101.0/24
//! user3 -> tag 102 -> vmforge-net-102, virbr102, 192.168.102.0/24
//! ```

mod identity;
mod provisioner;
mod xml;

pub use identity::{IsolationTag, UserIdentity};
pub use provisioner::{IsolationNetwork, NetworkProvisioner};
pub use xml::render_network_xml;

use sha2::{Digest, Sha256};
use vmforge_shared::constants::{mac_to_string, network};

/// Deterministic guest MAC for a VM name.
///
/// Locally administered QEMU prefix followed by three bytes of the name's
/// SHA-256, so the lease for a guest can be found again from its name alone.
pub fn guest_mac(vm_name: &str) -> String {
    let digest = Sha256::digest(vm_name.as_bytes());
    let [a, b, c] = network::GUEST_MAC_OUI;
    mac_to_string(&[a, b, c, digest[0], digest[1], digest[2]])
}
