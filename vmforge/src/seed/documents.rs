//! Seed document models.

use serde::Serialize;
use uuid::Uuid;
use vmforge_shared::constants::seed;
use vmforge_shared::{SeedError, VmforgeResult};

/// Packages every guest gets.
const GUEST_PACKAGES: &[&str] = &["qemu-guest-agent", "openssh-server"];

/// Identity document (`meta-data`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MetaData {
    pub instance_id: String,
    pub local_hostname: String,
}

/// Configuration document (`user-data`), rendered after the
/// `#cloud-config` header line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserData {
    pub hostname: String,
    pub users: Vec<UserEntry>,
    pub ssh_pwauth: bool,
    pub disable_root: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chpasswd: Option<ChPasswd>,
    pub packages: Vec<String>,
    pub runcmd: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserEntry {
    pub name: String,
    pub sudo: String,
    pub groups: String,
    pub shell: String,
    pub lock_passwd: bool,
    /// SHA-512 crypt hash. Never the raw secret.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passwd: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChPasswd {
    pub expire: bool,
}

/// The two rendered documents, as written to the seed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedSeed {
    pub meta_data: String,
    pub user_data: String,
}

/// Stable instance identifier for a hostname.
pub fn instance_id(hostname: &str) -> String {
    format!("iid-{}", Uuid::new_v5(&Uuid::NAMESPACE_DNS, hostname.as_bytes()))
}

impl UserData {
    fn new(hostname: &str, username: &str, password_hash: Option<&str>) -> Self {
        let has_password = password_hash.is_some();
        Self {
            hostname: hostname.to_string(),
            users: vec![UserEntry {
                name: username.to_string(),
                sudo: "ALL=(ALL) NOPASSWD:ALL".to_string(),
                groups: "sudo".to_string(),
                shell: "/bin/bash".to_string(),
                lock_passwd: !has_password,
                passwd: password_hash.map(str::to_string),
            }],
            ssh_pwauth: has_password,
            disable_root: true,
            chpasswd: has_password.then_some(ChPasswd { expire: false }),
            packages: GUEST_PACKAGES.iter().map(|p| p.to_string()).collect(),
            runcmd: vec![
                systemctl(&["enable", "--now", "qemu-guest-agent"]),
                systemctl(&["restart", "ssh"]),
            ],
        }
    }
}

fn systemctl(args: &[&str]) -> Vec<String> {
    std::iter::once("systemctl")
        .chain(args.iter().copied())
        .map(str::to_string)
        .collect()
}

/// Render both documents.
///
/// Pure: identical inputs give byte-identical output. `password_hash` must
/// already be hashed; without it the user is key/sudo only and SSH password
/// authentication stays off.
pub fn render_documents(
    hostname: &str,
    username: &str,
    password_hash: Option<&str>,
) -> VmforgeResult<RenderedSeed> {
    let meta = MetaData {
        instance_id: instance_id(hostname),
        local_hostname: hostname.to_string(),
    };
    let user = UserData::new(hostname, username, password_hash);

    let meta_data = serde_yaml::to_string(&meta).map_err(|e| SeedError::DocumentWriteFailed {
        document: seed::META_DATA.to_string(),
        error: e.to_string(),
    })?;
    let user_data = serde_yaml::to_string(&user).map_err(|e| SeedError::DocumentWriteFailed {
        document: seed::USER_DATA.to_string(),
        error: e.to_string(),
    })?;

    Ok(RenderedSeed {
        meta_data,
        user_data: format!("{}\n{}", seed::CLOUD_CONFIG_HEADER, user_data),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_is_deterministic() {
        let a = render_documents("vm-001", "ubuntu", Some("$6$salt$hash")).unwrap();
        let b = render_documents("vm-001", "ubuntu", Some("$6$salt$hash")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_meta_data_fields() {
        let seed = render_documents("vm-001", "ubuntu", None).unwrap();
        assert!(seed.meta_data.contains(&format!("instance-id: {}", instance_id("vm-001"))));
        assert!(seed.meta_data.contains("local-hostname: vm-001"));
        assert_ne!(instance_id("vm-001"), instance_id("vm-002"));
    }

    #[test]
    fn test_user_data_with_password() {
        let seed = render_documents("vm-001", "ubuntu", Some("$6$salt$hash")).unwrap();
        let user_data = &seed.user_data;
        assert!(user_data.starts_with("#cloud-config\n"));

        let doc: serde_yaml::Value =
            serde_yaml::from_str(user_data.trim_start_matches("#cloud-config\n")).unwrap();
        let user = &doc["users"][0];
        assert_eq!(user["name"].as_str(), Some("ubuntu"));
        assert_eq!(user["sudo"].as_str(), Some("ALL=(ALL) NOPASSWD:ALL"));
        assert_eq!(user["passwd"].as_str(), Some("$6$salt$hash"));
        assert_eq!(user["lock_passwd"].as_bool(), Some(false));
        assert_eq!(doc["ssh_pwauth"].as_bool(), Some(true));
        assert_eq!(doc["disable_root"].as_bool(), Some(true));
        assert_eq!(doc["packages"][0].as_str(), Some("qemu-guest-agent"));
        assert_eq!(doc["packages"][1].as_str(), Some("openssh-server"));
        assert!(doc["runcmd"].as_sequence().is_some_and(|cmds| !cmds.is_empty()));
    }

    #[test]
    fn test_user_data_without_password() {
        let seed = render_documents("vm-001", "ubuntu", None).unwrap();
        let doc: serde_yaml::Value =
            serde_yaml::from_str(seed.user_data.trim_start_matches("#cloud-config\n")).unwrap();
        assert!(doc["users"][0].get("passwd").is_none());
        assert_eq!(doc["users"][0]["lock_passwd"].as_bool(), Some(true));
        assert_eq!(doc["ssh_pwauth"].as_bool(), Some(false));
        assert!(doc.get("chpasswd").is_none());
    }
}
