use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::Ipv4Addr;
use vmforge_shared::{VmforgeError, VmforgeResult};

use super::{VmName, VmSpec, VmStatus};
use crate::credentials::Secret;
use crate::net::{IsolationTag, UserIdentity};

/// Why a running VM was returned without an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingReason {
    RetriesExhausted,
    DeadlineExceeded,
    Cancelled,
}

/// Outcome of address lease polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AddressResolution {
    NotAttempted,
    Resolved,
    Pending { reason: PendingReason },
}

impl AddressResolution {
    pub fn is_pending(&self) -> bool {
        matches!(self, AddressResolution::Pending { .. })
    }
}

/// A VM and everything provisioning learned about it.
///
/// The isolation tag is derived from the owning user at construction. Status
/// only moves forward; secret and address are written at most once.
#[derive(Debug, Clone, Serialize)]
pub struct VmRecord {
    name: VmName,
    user: UserIdentity,
    isolation_tag: IsolationTag,
    status: VmStatus,
    pub cpus: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
    address: Option<Ipv4Addr>,
    address_resolution: AddressResolution,
    pub username: String,
    #[serde(skip)]
    secret: Option<Secret>,
    /// Isolation network the guest is attached to.
    pub network: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl VmRecord {
    /// New record in `creating`.
    pub fn new(spec: &VmSpec, username: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: spec.name.clone(),
            user: spec.user,
            isolation_tag: spec.user.isolation_tag(),
            status: VmStatus::Creating,
            cpus: spec.cpus,
            memory_mb: spec.memory_mb,
            disk_gb: spec.disk_gb,
            address: None,
            address_resolution: AddressResolution::NotAttempted,
            username: username.into(),
            secret: None,
            network: None,
            created_at: now,
            last_updated: now,
        }
    }

    pub fn name(&self) -> &VmName {
        &self.name
    }

    pub fn user(&self) -> UserIdentity {
        self.user
    }

    pub fn isolation_tag(&self) -> IsolationTag {
        self.isolation_tag
    }

    pub fn status(&self) -> VmStatus {
        self.status
    }

    pub fn address(&self) -> Option<Ipv4Addr> {
        self.address
    }

    pub fn address_resolution(&self) -> AddressResolution {
        self.address_resolution
    }

    pub fn secret(&self) -> Option<&Secret> {
        self.secret.as_ref()
    }

    /// Validated status change.
    pub fn transition_to(&mut self, status: VmStatus) -> VmforgeResult<()> {
        if !self.status.can_transition_to(status) {
            return Err(VmforgeError::Internal(format!(
                "cannot transition {} from {} to {}",
                self.name, self.status, status
            )));
        }
        self.status = status;
        self.touch();
        Ok(())
    }

    pub fn set_secret(&mut self, secret: Secret) -> VmforgeResult<()> {
        if self.secret.is_some() {
            return Err(VmforgeError::Internal(format!(
                "secret of {} already set",
                self.name
            )));
        }
        self.secret = Some(secret);
        self.touch();
        Ok(())
    }

    pub fn set_address(&mut self, address: Ipv4Addr) -> VmforgeResult<()> {
        if self.address.is_some() {
            return Err(VmforgeError::Internal(format!(
                "address of {} already set",
                self.name
            )));
        }
        self.address = Some(address);
        self.address_resolution = AddressResolution::Resolved;
        self.touch();
        Ok(())
    }

    pub fn mark_address_pending(&mut self, reason: PendingReason) {
        if self.address.is_none() {
            self.address_resolution = AddressResolution::Pending { reason };
            self.touch();
        }
    }

    /// Copy without the secret, for storage.
    pub fn without_secret(&self) -> Self {
        let mut copy = self.clone();
        copy.secret = None;
        copy
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::options::ResourceLimits;
    use crate::vm::VmRequest;

    fn record() -> VmRecord {
        let spec = VmRequest::new("vm-001", "user2", 2, 2048, 20)
            .validate(&ResourceLimits::default())
            .unwrap();
        VmRecord::new(&spec, "ubuntu")
    }

    #[test]
    fn test_new_record_derives_tag() {
        let rec = record();
        assert_eq!(rec.status(), VmStatus::Creating);
        assert_eq!(rec.isolation_tag().value(), 101);
        assert_eq!(rec.address(), None);
        assert!(rec.secret().is_none());
    }

    #[test]
    fn test_write_once_fields() {
        let mut rec = record();
        rec.set_secret(Secret::new("aaaaaaaaaaaaaaaa")).unwrap();
        assert!(rec.set_secret(Secret::new("bbbbbbbbbbbbbbbb")).is_err());
        assert_eq!(rec.secret().unwrap().expose(), "aaaaaaaaaaaaaaaa");

        rec.set_address(Ipv4Addr::new(192, 168, 101, 20)).unwrap();
        assert!(rec.set_address(Ipv4Addr::new(192, 168, 101, 21)).is_err());
        assert_eq!(rec.address_resolution(), AddressResolution::Resolved);
    }

    #[test]
    fn test_status_never_regresses() {
        let mut rec = record();
        rec.transition_to(VmStatus::Running).unwrap();
        assert!(rec.transition_to(VmStatus::Creating).is_err());
        assert!(rec.transition_to(VmStatus::Failed).is_err());
        assert_eq!(rec.status(), VmStatus::Running);
    }

    #[test]
    fn test_pending_does_not_override_resolved() {
        let mut rec = record();
        rec.set_address(Ipv4Addr::new(192, 168, 101, 20)).unwrap();
        rec.mark_address_pending(PendingReason::Cancelled);
        assert_eq!(rec.address_resolution(), AddressResolution::Resolved);
    }

    #[test]
    fn test_serialized_record_has_no_secret() {
        let mut rec = record();
        rec.set_secret(Secret::new("supersecretvalue")).unwrap();
        let json = serde_json::to_string(&rec).unwrap();
        assert!(!json.contains("supersecretvalue"));
        assert!(rec.without_secret().secret().is_none());
    }
}
