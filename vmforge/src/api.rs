//! Caller-facing response shapes.
//!
//! Success:
//!
//! ```json
//! { "success": true,
//!   "vm": { "name": "vm-001", "user": "user1", "isolation_tag": 100, "status": "running",
//!           "ssh": { "address": "192.168.100.23", "username": "ubuntu", "secret": "…",
//!                    "address_pending": false } } }
//! ```
//!
//! Failure:
//!
//! ```json
//! { "success": false,
//!   "error": { "code": "NETWORK_DEFINE_FAILED", "message": "…", "details": "…",
//!              "timestamp": "2024-01-01T00:00:00Z" } }
//! ```

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use vmforge_shared::VmforgeError;

use crate::vm::{PendingReason, VmRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProvisionResponse {
    Success { success: bool, vm: VmBody },
    Failure { success: bool, error: ErrorBody },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmBody {
    pub name: String,
    pub user: String,
    pub isolation_tag: u16,
    pub status: String,
    pub ssh: SshBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshBody {
    /// Empty while the lease is pending.
    pub address: String,
    pub username: String,
    /// Empty in every response except the one that created the VM.
    pub secret: String,
    pub address_pending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable symbolic code, e.g. `DOMAIN_START_FAILED`.
    pub code: String,
    pub message: String,
    /// Raw diagnostic text of the failing subsystem.
    pub details: String,
    /// RFC 3339, UTC.
    pub timestamp: String,
}

impl ProvisionResponse {
    pub fn success(record: &VmRecord) -> Self {
        let pending_reason = match record.address_resolution() {
            crate::vm::AddressResolution::Pending { reason } => Some(pending_reason_str(reason)),
            _ => None,
        };

        ProvisionResponse::Success {
            success: true,
            vm: VmBody {
                name: record.name().to_string(),
                user: record.user().to_string(),
                isolation_tag: record.isolation_tag().value(),
                status: record.status().as_str().to_string(),
                ssh: SshBody {
                    address: record.address().map(|a| a.to_string()).unwrap_or_default(),
                    username: record.username.clone(),
                    secret: record
                        .secret()
                        .map(|s| s.expose().to_string())
                        .unwrap_or_default(),
                    address_pending: record.address_resolution().is_pending(),
                    pending_reason: pending_reason.map(str::to_string),
                },
            },
        }
    }

    pub fn failure(error: &VmforgeError) -> Self {
        ProvisionResponse::Failure {
            success: false,
            error: ErrorBody {
                code: error.code_name().to_string(),
                message: error.message(),
                details: error.details(),
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            },
        }
    }

    pub fn from_result(result: &Result<VmRecord, VmforgeError>) -> Self {
        match result {
            Ok(record) => Self::success(record),
            Err(e) => Self::failure(e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProvisionResponse::Success { .. })
    }
}

fn pending_reason_str(reason: PendingReason) -> &'static str {
    match reason {
        PendingReason::RetriesExhausted => "retries_exhausted",
        PendingReason::DeadlineExceeded => "deadline_exceeded",
        PendingReason::Cancelled => "cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Secret;
    use crate::runtime::options::ResourceLimits;
    use crate::vm::{VmRequest, VmStatus};
    use std::net::Ipv4Addr;
    use vmforge_shared::NetworkError;

    fn running_record() -> VmRecord {
        let spec = VmRequest::new("vm-001", "user1", 2, 2048, 20)
            .validate(&ResourceLimits::default())
            .unwrap();
        let mut record = VmRecord::new(&spec, "ubuntu");
        record.set_secret(Secret::new("s3cretS3cretS3cr")).unwrap();
        record.transition_to(VmStatus::Running).unwrap();
        record
    }

    #[test]
    fn test_success_shape() {
        let mut record = running_record();
        record.set_address(Ipv4Addr::new(192, 168, 100, 23)).unwrap();

        let json = serde_json::to_value(ProvisionResponse::success(&record)).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["vm"]["name"], "vm-001");
        assert_eq!(json["vm"]["user"], "user1");
        assert_eq!(json["vm"]["isolation_tag"], 100);
        assert_eq!(json["vm"]["status"], "running");
        assert_eq!(json["vm"]["ssh"]["address"], "192.168.100.23");
        assert_eq!(json["vm"]["ssh"]["username"], "ubuntu");
        assert_eq!(json["vm"]["ssh"]["secret"], "s3cretS3cretS3cr");
        assert_eq!(json["vm"]["ssh"]["address_pending"], false);
        assert!(json["vm"]["ssh"].get("pending_reason").is_none());
    }

    #[test]
    fn test_pending_address_is_empty() {
        let mut record = running_record();
        record.mark_address_pending(PendingReason::RetriesExhausted);

        let json = serde_json::to_value(ProvisionResponse::success(&record)).unwrap();
        assert_eq!(json["vm"]["ssh"]["address"], "");
        assert_eq!(json["vm"]["ssh"]["address_pending"], true);
        assert_eq!(json["vm"]["ssh"]["pending_reason"], "retries_exhausted");
    }

    #[test]
    fn test_failure_shape() {
        let error: VmforgeError = NetworkError::NetworkDefineFailed {
            network_name: "vmforge-net-100".into(),
            libvirt_error: "error: operation failed: bridge busy".into(),
        }
        .into();

        let response = ProvisionResponse::failure(&error);
        assert!(!response.is_success());

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "NETWORK_DEFINE_FAILED");
        assert_eq!(json["error"]["details"], "error: operation failed: bridge busy");
        let timestamp = json["error"]["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[test]
    fn test_round_trip_parses_as_failure() {
        let error = VmforgeError::Cancelled { stage: "seed" };
        let text = serde_json::to_string(&ProvisionResponse::failure(&error)).unwrap();
        let parsed: ProvisionResponse = serde_json::from_str(&text).unwrap();
        assert!(!parsed.is_success());
    }
}
