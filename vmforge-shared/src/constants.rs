//! Constants shared across vmforge components.
//!
//! These define the isolation network topology and must stay consistent
//! between the orchestrator and anything that inspects its networks.

/// Isolation network topology (one network per user identity).
pub mod network {
    /// Prefix of every isolation network name; the tag is appended.
    pub const NETWORK_NAME_PREFIX: &str = "vmforge-net-";

    /// Prefix of the host bridge backing an isolation network.
    pub const BRIDGE_PREFIX: &str = "virbr";

    /// First two octets of every isolation subnet; the tag is the third.
    pub const SUBNET_BASE: [u8; 2] = [192, 168];

    /// Prefix length of every isolation subnet.
    pub const PREFIX_LEN: u8 = 24;

    /// Host octet of the gateway address.
    pub const GATEWAY_HOST: u8 = 1;

    /// First host octet handed out by DHCP.
    pub const DHCP_RANGE_START: u8 = 10;

    /// Last host octet handed out by DHCP.
    pub const DHCP_RANGE_END: u8 = 100;

    /// OUI used for guest MAC addresses (QEMU/KVM locally administered range).
    pub const GUEST_MAC_OUI: [u8; 3] = [0x52, 0x54, 0x00];
}

/// First-boot configuration seed layout.
pub mod seed {
    /// Volume label the guest init system looks for.
    pub const VOLUME_ID: &str = "cidata";

    pub const META_DATA: &str = "meta-data";

    pub const USER_DATA: &str = "user-data";

    /// Header line required at the top of the user-data document.
    pub const CLOUD_CONFIG_HEADER: &str = "#cloud-config";
}

/// Helper function to format MAC address as string
pub fn mac_to_string(mac: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}
