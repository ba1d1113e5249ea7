//! Domain XML generation.

use std::path::{Path, PathBuf};
use uuid::Uuid;
use vmforge_shared::{ConfigError, VmforgeResult};

use crate::disk::DiskFormat;

#[derive(Debug, Clone)]
struct DiskSpec {
    path: PathBuf,
    format: DiskFormat,
    target: &'static str,
    read_only: bool,
}

/// Builder for libvirt domain definitions.
///
/// ```
/// use vmforge::domain::DomainXmlBuilder;
///
/// let xml = DomainXmlBuilder::new()
///     .with_name("vm-001")
///     .with_vcpus(2)
///     .with_memory_mib(2048)
///     .with_root_disk("/var/lib/libvirt/images/vm-001.qcow2")
///     .with_seed_disk("/var/lib/libvirt/images/vm-001-seed.iso")
///     .with_network("vmforge-net-100", "52:54:00:12:34:56")
///     .build_xml()
///     .unwrap();
/// assert!(xml.contains("<vcpu>2</vcpu>"));
/// ```
#[derive(Debug, Default)]
pub struct DomainXmlBuilder {
    name: Option<String>,
    uuid: Option<Uuid>,
    memory_mib: Option<u64>,
    vcpus: Option<u32>,
    disks: Vec<DiskSpec>,
    network: Option<(String, String)>,
}

impl DomainXmlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Fixed UUID; a random one is generated otherwise.
    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    pub fn with_memory_mib(mut self, memory_mib: u64) -> Self {
        self.memory_mib = Some(memory_mib);
        self
    }

    pub fn with_vcpus(mut self, vcpus: u32) -> Self {
        self.vcpus = Some(vcpus);
        self
    }

    /// Writable qcow2 root disk on `vda`.
    pub fn with_root_disk(mut self, path: impl AsRef<Path>) -> Self {
        self.disks.push(DiskSpec {
            path: path.as_ref().to_path_buf(),
            format: DiskFormat::Qcow2,
            target: "vda",
            read_only: false,
        });
        self
    }

    /// Read-only raw seed volume on `vdb`.
    pub fn with_seed_disk(mut self, path: impl AsRef<Path>) -> Self {
        self.disks.push(DiskSpec {
            path: path.as_ref().to_path_buf(),
            format: DiskFormat::Raw,
            target: "vdb",
            read_only: true,
        });
        self
    }

    /// Virtio interface on a named libvirt network.
    pub fn with_network(mut self, network: &str, mac: &str) -> Self {
        self.network = Some((network.to_string(), mac.to_string()));
        self
    }

    pub fn build_xml(self) -> VmforgeResult<String> {
        let name = self
            .name
            .ok_or_else(|| ConfigError::invalid_field("name", "domain name is required"))?;
        let memory = self
            .memory_mib
            .ok_or_else(|| ConfigError::invalid_field("memory", "memory is required"))?;
        let vcpus = self
            .vcpus
            .ok_or_else(|| ConfigError::invalid_field("cpu", "vcpu count is required"))?;
        let uuid = self.uuid.unwrap_or_else(Uuid::new_v4);

        let mut xml = format!(
            r#"<domain type="kvm">
  <name>{}</name>
  <uuid>{}</uuid>
  <memory unit="MiB">{}</memory>
  <currentMemory unit="MiB">{}</currentMemory>
  <vcpu>{}</vcpu>
  <os>
    <type arch="x86_64" machine="q35">hvm</type>
    <boot dev="hd"/>
  </os>
  <features>
    <acpi/>
    <apic/>
  </features>
  <cpu mode="host-passthrough"/>
  <clock offset="utc"/>
  <on_poweroff>destroy</on_poweroff>
  <on_reboot>restart</on_reboot>
  <on_crash>destroy</on_crash>
  <devices>"#,
            escape(&name),
            uuid,
            memory,
            memory,
            vcpus
        );

        for disk in &self.disks {
            xml.push_str(&format!(
                r#"
    <disk type="file" device="disk">
      <driver name="qemu" type="{}"/>
      <source file="{}"/>
      <target dev="{}" bus="virtio"/>{}
    </disk>"#,
                disk.format.as_str(),
                escape(&disk.path.to_string_lossy()),
                disk.target,
                if disk.read_only { "\n      <readonly/>" } else { "" }
            ));
        }

        if let Some((network, mac)) = &self.network {
            xml.push_str(&format!(
                r#"
    <interface type="network">
      <source network="{}"/>
      <mac address="{}"/>
      <model type="virtio"/>
    </interface>"#,
                escape(network),
                escape(mac)
            ));
        }

        xml.push_str(
            r#"
    <serial type="pty">
      <target port="0"/>
    </serial>
    <console type="pty">
      <target type="serial" port="0"/>
    </console>
    <channel type="unix">
      <target type="virtio" name="org.qemu.guest_agent.0"/>
    </channel>
  </devices>
</domain>
"#,
        );

        Ok(xml)
    }
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
