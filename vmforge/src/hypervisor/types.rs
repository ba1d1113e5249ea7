//! Records returned by the control plane.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// A virtual network known to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub name: String,
    pub bridge: Option<String>,
    pub active: bool,
    pub autostart: bool,
}

/// A storage pool known to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolInfo {
    pub name: String,
    /// Directory volumes of this pool live in.
    pub path: PathBuf,
    pub active: bool,
}

/// An active DHCP lease on a virtual network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Lower-case colon-separated MAC address.
    pub mac: String,
    pub ip: Ipv4Addr,
    pub prefix: u8,
    pub hostname: Option<String>,
    pub expiry: Option<String>,
}

impl Lease {
    /// Whether this lease belongs to the guest with `hostname` or `mac`.
    pub fn matches(&self, hostname: &str, mac: &str) -> bool {
        self.mac.eq_ignore_ascii_case(mac) || self.hostname.as_deref() == Some(hostname)
    }
}
