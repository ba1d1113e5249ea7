//! User identities and their fixed isolation tags.
//!
//! The set of identities is closed: adding one is a code change, never
//! runtime configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use vmforge_shared::ConfigError;
use vmforge_shared::constants::network;

/// A user that may own virtual machines on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserIdentity {
    User1,
    User2,
    User3,
}

impl UserIdentity {
    /// Number of known identities.
    pub const COUNT: usize = 3;

    /// Every known identity, in tag order.
    pub const ALL: [UserIdentity; Self::COUNT] = [
        UserIdentity::User1,
        UserIdentity::User2,
        UserIdentity::User3,
    ];

    /// Fixed isolation tag for this identity.
    pub const fn isolation_tag(self) -> IsolationTag {
        match self {
            UserIdentity::User1 => IsolationTag(100),
            UserIdentity::User2 => IsolationTag(101),
            UserIdentity::User3 => IsolationTag(102),
        }
    }

    /// Position in [`UserIdentity::ALL`], used to index per-user state.
    pub const fn index(self) -> usize {
        match self {
            UserIdentity::User1 => 0,
            UserIdentity::User2 => 1,
            UserIdentity::User3 => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserIdentity::User1 => "user1",
            UserIdentity::User2 => "user2",
            UserIdentity::User3 => "user3",
        }
    }
}

impl FromStr for UserIdentity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user1" => Ok(UserIdentity::User1),
            "user2" => Ok(UserIdentity::User2),
            "user3" => Ok(UserIdentity::User3),
            other => Err(ConfigError::UnknownUser {
                user: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Integer separating one user's network address space from another's.
///
/// The tag doubles as the third octet of the user's subnet, so two distinct
/// tags can never produce overlapping address spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IsolationTag(u16);

impl IsolationTag {
    pub const fn value(self) -> u16 {
        self.0
    }

    /// Name of the isolation network, e.g. `vmforge-net-100`.
    pub fn network_name(self) -> String {
        format!("{}{}", network::NETWORK_NAME_PREFIX, self.0)
    }

    /// Host bridge name, e.g. `virbr100`.
    pub fn bridge_name(self) -> String {
        format!("{}{}", network::BRIDGE_PREFIX, self.0)
    }

    /// Address inside this tag's subnet with the given host octet.
    pub fn host(self, host: u8) -> Ipv4Addr {
        let [a, b] = network::SUBNET_BASE;
        Ipv4Addr::new(a, b, self.0 as u8, host)
    }

    pub fn subnet(self) -> Ipv4Addr {
        self.host(0)
    }

    pub fn gateway(self) -> Ipv4Addr {
        self.host(network::GATEWAY_HOST)
    }

    pub fn netmask(self) -> Ipv4Addr {
        let bits = u32::MAX << (32 - u32::from(network::PREFIX_LEN));
        Ipv4Addr::from(bits)
    }

    /// Inclusive DHCP range carved from the low end of the subnet.
    pub fn dhcp_range(self) -> (Ipv4Addr, Ipv4Addr) {
        (
            self.host(network::DHCP_RANGE_START),
            self.host(network::DHCP_RANGE_END),
        )
    }

    /// CIDR notation of the subnet, e.g. `192.168.100.0/24`.
    pub fn cidr(self) -> String {
        format!("{}/{}", self.subnet(), network::PREFIX_LEN)
    }

    /// Whether `addr` falls inside this tag's subnet.
    pub fn contains(self, addr: Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask());
        u32::from(addr) & mask == u32::from(self.subnet()) & mask
    }
}

impl fmt::Display for IsolationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
