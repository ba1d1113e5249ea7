//! Control plane backed by the `virsh` command line client.

use async_trait::async_trait;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use super::{
    Connection, ControlPlaneError, ControlPlaneResult, DomainControl, Lease, NetworkControl,
    NetworkInfo, PoolInfo, StoragePoolControl,
};
use crate::util::process::{ToolError, run_tool};
use xml::reader::{EventReader, XmlEvent};

/// Phrases virsh uses when the named object does not exist.
const NOT_FOUND_MARKERS: &[&str] = &[
    "not found",
    "no network with matching name",
    "no storage pool with matching name",
    "no domain with matching name",
];

/// Phrases virsh uses when it cannot reach the daemon.
const UNREACHABLE_MARKERS: &[&str] = &[
    "failed to connect to the hypervisor",
    "failed to connect socket",
];

/// Drives libvirt through `virsh -c <uri>`.
#[derive(Debug, Clone)]
pub struct VirshControlPlane {
    uri: String,
    binary: PathBuf,
}

impl VirshControlPlane {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            binary: PathBuf::from("virsh"),
        }
    }

    /// Use a specific `virsh` binary instead of the one on `PATH`.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Run a virsh subcommand and return its stdout.
    async fn virsh(&self, args: &[&str]) -> ControlPlaneResult<String> {
        let mut full = vec!["-c", self.uri.as_str()];
        full.extend_from_slice(args);

        let output = run_tool(&self.binary, &full).await.map_err(|e| match e {
            ToolError::Spawn { error, .. } => ControlPlaneError::Unreachable(error),
            other => ControlPlaneError::Rejected(other.output()),
        })?;

        if output.success {
            return Ok(output.stdout);
        }

        let text = output.diagnostics();
        tracing::debug!(args = ?args, error = %text, "virsh command failed");
        Err(classify_failure(text))
    }

    /// Like [`Self::virsh`] but maps "no such object" to `None`.
    async fn virsh_lookup(&self, args: &[&str]) -> ControlPlaneResult<Option<String>> {
        match self.virsh(args).await {
            Ok(stdout) => Ok(Some(stdout)),
            Err(ControlPlaneError::Rejected(msg)) if is_not_found(&msg) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Stage `xml` in a temporary file and pass it to `subcommand`.
    async fn define_from_xml(&self, subcommand: &str, xml: &str) -> ControlPlaneResult<()> {
        let mut file = tempfile::Builder::new()
            .prefix("vmforge-")
            .suffix(".xml")
            .tempfile()
            .map_err(|e| ControlPlaneError::Rejected(format!("cannot stage XML: {}", e)))?;
        file.write_all(xml.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| ControlPlaneError::Rejected(format!("cannot stage XML: {}", e)))?;

        let path = file.path().to_string_lossy().into_owned();
        self.virsh(&[subcommand, &path]).await.map(|_| ())
    }
}

#[async_trait]
impl Connection for VirshControlPlane {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn ping(&self) -> ControlPlaneResult<()> {
        match self.virsh(&["uri"]).await {
            Ok(_) => Ok(()),
            // Any refusal at this point means we never got a working session.
            Err(e) => Err(ControlPlaneError::Unreachable(e.message().to_string())),
        }
    }
}

#[async_trait]
impl NetworkControl for VirshControlPlane {
    async fn lookup_network(&self, name: &str) -> ControlPlaneResult<Option<NetworkInfo>> {
        Ok(self
            .virsh_lookup(&["net-info", name])
            .await?
            .map(|stdout| parse_net_info(name, &stdout)))
    }

    async fn define_network(&self, xml: &str) -> ControlPlaneResult<()> {
        self.define_from_xml("net-define", xml).await
    }

    async fn start_network(&self, name: &str) -> ControlPlaneResult<()> {
        self.virsh(&["net-start", name]).await.map(|_| ())
    }

    async fn set_network_autostart(&self, name: &str) -> ControlPlaneResult<()> {
        self.virsh(&["net-autostart", name]).await.map(|_| ())
    }

    async fn list_leases(&self, network: &str) -> ControlPlaneResult<Vec<Lease>> {
        let stdout = self.virsh(&["net-dhcp-leases", network]).await?;
        Ok(parse_leases(&stdout))
    }
}

#[async_trait]
impl StoragePoolControl for VirshControlPlane {
    async fn lookup_pool(&self, name: &str) -> ControlPlaneResult<Option<PoolInfo>> {
        let Some(info) = self.virsh_lookup(&["pool-info", name]).await? else {
            return Ok(None);
        };
        let xml = self.virsh(&["pool-dumpxml", name]).await?;
        let path = parse_pool_path(&xml).ok_or_else(|| {
            ControlPlaneError::Rejected(format!("pool '{}' has no target path", name))
        })?;

        Ok(Some(PoolInfo {
            name: name.to_string(),
            path,
            active: parse_pool_active(&info),
        }))
    }

    async fn refresh_pool(&self, name: &str) -> ControlPlaneResult<()> {
        self.virsh(&["pool-refresh", name]).await.map(|_| ())
    }

    async fn delete_volume(&self, pool: &str, volume: &str) -> ControlPlaneResult<()> {
        self.virsh(&["vol-delete", "--pool", pool, volume])
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl DomainControl for VirshControlPlane {
    async fn domain_exists(&self, name: &str) -> ControlPlaneResult<bool> {
        Ok(self.virsh_lookup(&["dominfo", name]).await?.is_some())
    }

    async fn define_domain(&self, xml: &str) -> ControlPlaneResult<()> {
        self.define_from_xml("define", xml).await
    }

    async fn start_domain(&self, name: &str) -> ControlPlaneResult<()> {
        self.virsh(&["start", name]).await.map(|_| ())
    }

    async fn undefine_domain(&self, name: &str) -> ControlPlaneResult<()> {
        // A domain that failed to start may still hold a transient process.
        if let Err(e) = self.virsh(&["destroy", name]).await {
            tracing::debug!(domain = %name, error = %e, "destroy before undefine failed");
        }
        self.virsh(&["undefine", name]).await.map(|_| ())
    }
}

fn classify_failure(text: String) -> ControlPlaneError {
    let lower = text.to_ascii_lowercase();
    if UNREACHABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        ControlPlaneError::Unreachable(text)
    } else {
        ControlPlaneError::Rejected(text)
    }
}

fn is_not_found(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    NOT_FOUND_MARKERS.iter().any(|m| lower.contains(m))
}

/// Split `Key:   value` lines of `net-info` / `pool-info` output.
fn info_fields(stdout: &str) -> impl Iterator<Item = (&str, &str)> {
    stdout
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim(), v.trim()))
}

fn parse_net_info(name: &str, stdout: &str) -> NetworkInfo {
    let mut info = NetworkInfo {
        name: name.to_string(),
        bridge: None,
        active: false,
        autostart: false,
    };

    for (key, value) in info_fields(stdout) {
        match key {
            "Active" => info.active = value == "yes",
            "Autostart" => info.autostart = value == "yes",
            "Bridge" if !value.is_empty() => info.bridge = Some(value.to_string()),
            _ => {}
        }
    }

    info
}

fn parse_pool_active(stdout: &str) -> bool {
    info_fields(stdout).any(|(key, value)| key == "State" && value == "running")
}

/// Text of `<pool><target><path>` in `pool-dumpxml` output, entities resolved.
///
/// `<source>` may carry its own `<dir>`/`<device>` paths; only the target
/// path says where volume files live.
fn parse_pool_path(xml: &str) -> Option<PathBuf> {
    const TARGET_PATH: [&str; 3] = ["pool", "target", "path"];

    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();

    for event in EventReader::new(xml.as_bytes()) {
        match event.ok()? {
            XmlEvent::StartElement { name, .. } => stack.push(name.local_name),
            XmlEvent::Characters(chunk) | XmlEvent::CData(chunk)
                if stack.iter().map(String::as_str).eq(TARGET_PATH) =>
            {
                text.push_str(&chunk);
            }
            XmlEvent::EndElement { .. } => {
                if stack.iter().map(String::as_str).eq(TARGET_PATH) {
                    let path = text.trim();
                    return (!path.is_empty()).then(|| PathBuf::from(path));
                }
                stack.pop();
            }
            _ => {}
        }
    }
    None
}

/// Parse the table printed by `virsh net-dhcp-leases`.
///
/// ```text
///  Expiry Time           MAC address         Protocol   IP address          Hostname   Client ID or DUID
/// -----------------------------------------------------------------------------------------------------------
///  2026-10-18 10:00:00   52:54:00:6c:3c:01   ipv4       192.168.100.45/24   vm-001     ff:00:...
/// ```
fn parse_leases(stdout: &str) -> Vec<Lease> {
    stdout
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(parse_lease_row)
        .collect()
}

fn parse_lease_row(line: &str) -> Option<Lease> {
    let cols: Vec<&str> = line.split_whitespace().collect();
    if cols.len() < 5 {
        return None;
    }

    let (date, time, mac, protocol, address) = (cols[0], cols[1], cols[2], cols[3], cols[4]);
    if protocol != "ipv4" {
        return None;
    }

    let (ip, prefix) = match address.split_once('/') {
        Some((ip, prefix)) => (ip, prefix.parse().ok()?),
        None => (address, 32),
    };
    let ip: Ipv4Addr = ip.parse().ok()?;

    let hostname = cols
        .get(5)
        .filter(|h| **h != "-")
        .map(|h| h.to_string());

    Some(Lease {
        mac: mac.to_ascii_lowercase(),
        ip,
        prefix,
        hostname,
        expiry: Some(format!("{} {}", date, time)),
    })
}
