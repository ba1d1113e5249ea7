//! Provisioning requests and their validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use vmforge_shared::ConfigError;

use crate::net::UserIdentity;
use crate::runtime::constants::limits::MAX_NAME_LEN;
use crate::runtime::options::ResourceLimits;

/// A validated VM name.
///
/// Starts with an ASCII letter, continues with ASCII letters, digits, `-`
/// or `_`, at most 63 characters. Safe to embed in hostnames, volume file
/// names and XML without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct VmName(String);

impl VmName {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::invalid_field("name", "must not be empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(ConfigError::invalid_field(
                "name",
                format!("must be at most {} characters", MAX_NAME_LEN),
            ));
        }
        let mut chars = name.chars();
        if !chars.next().is_some_and(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::invalid_field("name", "must start with a letter"));
        }
        if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_')) {
            return Err(ConfigError::invalid_field(
                "name",
                format!("contains invalid character {:?}", bad),
            ));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VmName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Caller-supplied provisioning request, as received on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRequest {
    pub name: String,
    pub user: String,
    pub cpu: u32,
    /// Memory in MB.
    pub memory: u64,
    /// Disk in GB.
    pub disk: u64,
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmSpec {
    pub name: VmName,
    pub user: UserIdentity,
    pub cpus: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
}

impl VmRequest {
    pub fn new(name: impl Into<String>, user: impl Into<String>, cpu: u32, memory: u64, disk: u64) -> Self {
        Self {
            name: name.into(),
            user: user.into(),
            cpu,
            memory,
            disk,
        }
    }

    /// Check every field against `limits`. Makes no external calls.
    pub fn validate(&self, limits: &ResourceLimits) -> Result<VmSpec, ConfigError> {
        let name = VmName::parse(&self.name)?;
        let user: UserIdentity = self.user.parse()?;

        check_range("cpu", u64::from(self.cpu), u64::from(limits.min_cpus), u64::from(limits.max_cpus))?;
        check_range("memory", self.memory, limits.min_memory_mb, limits.max_memory_mb)?;
        check_range("disk", self.disk, limits.min_disk_gb, limits.max_disk_gb)?;

        Ok(VmSpec {
            name,
            user,
            cpus: self.cpu,
            memory_mb: self.memory,
            disk_gb: self.disk,
        })
    }
}

fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::invalid_field(
            field,
            format!("{} is outside the allowed range {}..={}", value, min, max),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn field_of(err: ConfigError) -> &'static str {
        match err {
            ConfigError::InvalidField { field, .. } => field,
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_valid_request() {
        let spec = VmRequest::new("vm-001", "user1", 2, 2048, 20)
            .validate(&ResourceLimits::default())
            .unwrap();
        assert_eq!(spec.name.as_str(), "vm-001");
        assert_eq!(spec.user, UserIdentity::User1);
        assert_eq!(spec.cpus, 2);
    }

    #[test]
    fn test_rejects_bad_names() {
        let limits = ResourceLimits::default();
        for name in ["", "1vm", "-vm", "vm 001", "vm/001", "vm.001", "vm<x>"] {
            let err = VmRequest::new(name, "user1", 2, 2048, 20)
                .validate(&limits)
                .unwrap_err();
            assert_eq!(field_of(err), "name", "name {name:?}");
        }
        let long = "a".repeat(64);
        assert!(VmName::parse(&long).is_err());
        assert!(VmName::parse(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn test_rejects_unknown_user() {
        let err = VmRequest::new("vm-001", "mallory", 2, 2048, 20)
            .validate(&ResourceLimits::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownUser { .. }));
    }

    #[test]
    fn test_rejects_out_of_range_resources() {
        let limits = ResourceLimits::default();
        let cases = [
            (VmRequest::new("vm", "user1", 0, 2048, 20), "cpu"),
            (VmRequest::new("vm", "user1", 17, 2048, 20), "cpu"),
            (VmRequest::new("vm", "user1", 2, 256, 20), "memory"),
            (VmRequest::new("vm", "user1", 2, 2048, 5), "disk"),
            (VmRequest::new("vm", "user1", 2, 2048, 501), "disk"),
        ];
        for (req, field) in cases {
            assert_eq!(field_of(req.validate(&limits).unwrap_err()), field);
        }
    }

    #[test]
    fn test_request_wire_shape() {
        let req: VmRequest = serde_json::from_str(
            r#"{"name":"vm-001","user":"user1","cpu":2,"memory":2048,"disk":20}"#,
        )
        .unwrap();
        assert_eq!(req, VmRequest::new("vm-001", "user1", 2, 2048, 20));
    }

    proptest! {
        #[test]
        fn prop_valid_names_accepted(name in "[a-zA-Z][a-zA-Z0-9_-]{0,62}") {
            prop_assert!(VmName::parse(&name).is_ok());
        }

        #[test]
        fn prop_names_with_forbidden_chars_rejected(
            prefix in "[a-z]{1,8}",
            bad in "[ ./<>&'\"]",
        ) {
            let name = format!("{prefix}{bad}");
            prop_assert!(VmName::parse(&name).is_err());
        }
    }
}
