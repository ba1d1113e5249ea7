//! Isolation network definition.

use super::IsolationTag;

/// Render the libvirt network definition for `tag`.
///
/// NAT forwarding, a bridge named after the tag and a DHCP range carved from
/// the low end of the tag's /24.
///
/// Guests reach the outside through NAT so first boot can install packages.
/// Traffic between two tags is dropped by the per-bridge reject rules libvirt
/// installs for every NAT network; nothing routes one tag's subnet to another.
pub fn render_network_xml(tag: IsolationTag) -> String {
    let (dhcp_start, dhcp_end) = tag.dhcp_range();
    format!(
        r#"<network>
  <name>{name}</name>
  <forward mode="nat"/>
  <bridge name="{bridge}" stp="on" delay="0"/>
  <ip address="{gateway}" netmask="{netmask}">
    <dhcp>
      <range start="{dhcp_start}" end="{dhcp_end}"/>
    </dhcp>
  </ip>
</network>
"#,
        name = tag.network_name(),
        bridge = tag.bridge_name(),
        gateway = tag.gateway(),
        netmask = tag.netmask(),
    )
}
