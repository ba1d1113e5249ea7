//! Error taxonomy for vmforge.
//!
//! Errors are grouped by the external subsystem that produced them:
//! - [`ConfigError`]: caller input rejected before any external call
//! - [`ConnectionError`]: hypervisor control plane unreachable
//! - [`NetworkError`]: isolation network definition, activation and leases
//! - [`StorageError`]: storage pool, golden image and volume derivation
//! - [`SeedError`]: first-boot configuration seed rendering and packaging
//! - [`DomainError`]: guest definition and start
//!
//! Every leaf variant carries a stable numeric code, a symbolic code name, an
//! [`ErrorCategory`] and a structured context map for logging:
//!
//! ```ignore
//! match manager.create_and_start(request).await {
//!     Err(e) if e.category() == ErrorCategory::Configuration => { /* fix input */ }
//!     Err(e) => tracing::error!(code = e.code(), context = ?e.context(), "{}", e),
//!     Ok(record) => { /* ... */ }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Result alias used throughout vmforge.
pub type VmforgeResult<T> = Result<T, VmforgeError>;

/// Structured context attached to an error (`{network_name, libvirt_error}` ...).
pub type ErrorContext = BTreeMap<&'static str, String>;

/// Coarse failure family, used to pick caller remediation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Bad caller input. No external state was touched.
    Configuration,
    /// Control plane could not be reached.
    Connection,
    /// Pool, image or quota problem on the host.
    Resource,
    /// An external subsystem rejected a define/create/start call.
    Creation,
    /// Lease or address resolution failed.
    Network,
    /// Caller cancelled the operation or its deadline passed.
    Cancelled,
    /// Broken invariant inside vmforge itself.
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Connection => "connection",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Creation => "creation",
            ErrorCategory::Network => "network",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Errors returned by vmforge operations.
#[derive(Debug, Error)]
pub enum VmforgeError {
    /// Caller input failed validation.
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// Control plane unreachable.
    #[error("connection: {0}")]
    Connection(#[from] ConnectionError),

    /// Isolation network failure.
    #[error("network: {0}")]
    Network(#[from] NetworkError),

    /// Storage pool or volume failure.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    /// Configuration seed failure.
    #[error("seed: {0}")]
    Seed(#[from] SeedError),

    /// Domain definition or start failure.
    #[error("domain: {0}")]
    Domain(#[from] DomainError),

    /// Pipeline aborted between stages.
    #[error("cancelled before stage '{stage}'")]
    Cancelled { stage: &'static str },

    /// Broken internal invariant.
    #[error("internal: {0}")]
    Internal(String),
}

impl VmforgeError {
    /// Stable numeric code.
    pub fn code(&self) -> u16 {
        match self {
            VmforgeError::Config(e) => e.code(),
            VmforgeError::Connection(e) => e.code(),
            VmforgeError::Network(e) => e.code(),
            VmforgeError::Storage(e) => e.code(),
            VmforgeError::Seed(e) => e.code(),
            VmforgeError::Domain(e) => e.code(),
            VmforgeError::Cancelled { .. } => 9001,
            VmforgeError::Internal(_) => 9999,
        }
    }

    /// Stable symbolic code, e.g. `NETWORK_DEFINE_FAILED`.
    pub fn code_name(&self) -> &'static str {
        match self {
            VmforgeError::Config(e) => e.code_name(),
            VmforgeError::Connection(e) => e.code_name(),
            VmforgeError::Network(e) => e.code_name(),
            VmforgeError::Storage(e) => e.code_name(),
            VmforgeError::Seed(e) => e.code_name(),
            VmforgeError::Domain(e) => e.code_name(),
            VmforgeError::Cancelled { .. } => "CANCELLED",
            VmforgeError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            VmforgeError::Config(e) => e.category(),
            VmforgeError::Connection(_) => ErrorCategory::Connection,
            VmforgeError::Network(e) => e.category(),
            VmforgeError::Storage(e) => e.category(),
            VmforgeError::Seed(e) => e.category(),
            VmforgeError::Domain(_) => ErrorCategory::Creation,
            VmforgeError::Cancelled { .. } => ErrorCategory::Cancelled,
            VmforgeError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Human-readable message without the family prefix.
    pub fn message(&self) -> String {
        match self {
            VmforgeError::Config(e) => e.to_string(),
            VmforgeError::Connection(e) => e.to_string(),
            VmforgeError::Network(e) => e.to_string(),
            VmforgeError::Storage(e) => e.to_string(),
            VmforgeError::Seed(e) => e.to_string(),
            VmforgeError::Domain(e) => e.to_string(),
            other => other.to_string(),
        }
    }

    /// Raw diagnostic text from the failing subsystem, or the message when
    /// the failure originated inside vmforge.
    pub fn details(&self) -> String {
        let ctx = self.context();
        ["libvirt_error", "tool_output", "error"]
            .iter()
            .find_map(|key| ctx.get(key).cloned())
            .unwrap_or_else(|| self.message())
    }

    /// Structured context for logging and telemetry.
    pub fn context(&self) -> ErrorContext {
        match self {
            VmforgeError::Config(e) => e.context(),
            VmforgeError::Connection(e) => e.context(),
            VmforgeError::Network(e) => e.context(),
            VmforgeError::Storage(e) => e.context(),
            VmforgeError::Seed(e) => e.context(),
            VmforgeError::Domain(e) => e.context(),
            VmforgeError::Cancelled { stage } => ctx([("stage", stage.to_string())]),
            VmforgeError::Internal(msg) => ctx([("error", msg.clone())]),
        }
    }

    /// True when the error is the "already exists" creation condition.
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            VmforgeError::Domain(DomainError::AlreadyExists { .. })
                | VmforgeError::Storage(StorageError::VolumeExists { .. })
        )
    }
}

fn ctx<const N: usize>(pairs: [(&'static str, String); N]) -> ErrorContext {
    pairs.into_iter().collect()
}

// ============================================================================
// Config Errors
// ============================================================================

/// Caller input rejected during validation.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A request field is out of bounds or malformed.
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// The user identity is not one of the known identities.
    #[error("unknown user identity '{user}'")]
    UnknownUser { user: String },

    /// Manager options are inconsistent.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Another manager holds the home directory in a conflicting mode.
    #[error("another vmforge manager is already using directory: {path}")]
    HomeInUse { path: String },
}

impl ConfigError {
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            ConfigError::InvalidField { .. } => 1001,
            ConfigError::UnknownUser { .. } => 1002,
            ConfigError::InvalidOptions(_) => 1003,
            ConfigError::HomeInUse { .. } => 1004,
        }
    }

    pub fn code_name(&self) -> &'static str {
        match self {
            ConfigError::InvalidField { .. } => "INVALID_FIELD",
            ConfigError::UnknownUser { .. } => "UNKNOWN_USER",
            ConfigError::InvalidOptions(_) => "INVALID_OPTIONS",
            ConfigError::HomeInUse { .. } => "HOME_IN_USE",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }

    pub fn context(&self) -> ErrorContext {
        match self {
            ConfigError::InvalidField { field, reason } => {
                ctx([("field", field.to_string()), ("reason", reason.clone())])
            }
            ConfigError::UnknownUser { user } => ctx([("user", user.clone())]),
            ConfigError::InvalidOptions(reason) => ctx([("reason", reason.clone())]),
            ConfigError::HomeInUse { path } => ctx([("path", path.clone())]),
        }
    }
}

// ============================================================================
// Connection Errors
// ============================================================================

/// Control plane could not be reached.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("control plane at {uri} unreachable: {error}")]
    Unreachable { uri: String, error: String },
}

impl ConnectionError {
    pub fn code(&self) -> u16 {
        1101
    }

    pub fn code_name(&self) -> &'static str {
        "CONTROL_PLANE_UNREACHABLE"
    }

    pub fn context(&self) -> ErrorContext {
        match self {
            ConnectionError::Unreachable { uri, error } => {
                ctx([("uri", uri.clone()), ("libvirt_error", error.clone())])
            }
        }
    }
}

// ============================================================================
// Network Errors
// ============================================================================

/// Isolation network failures.
#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    #[error("failed to define network '{network_name}'")]
    NetworkDefineFailed {
        network_name: String,
        libvirt_error: String,
    },

    #[error("failed to start network '{network_name}'")]
    NetworkStartFailed {
        network_name: String,
        libvirt_error: String,
    },

    #[error("network '{network_name}' not found")]
    NetworkNotFound { network_name: String },

    #[error("invalid network configuration for '{value}': {reason}")]
    InvalidNetworkConfig { value: String, reason: String },

    #[error("failed to query DHCP leases on network '{network_name}'")]
    DhcpLeaseFailed {
        network_name: String,
        libvirt_error: String,
    },

    #[error("no address lease for '{vm_name}' on network '{network_name}'")]
    IpAddressNotFound {
        vm_name: String,
        network_name: String,
    },
}

impl NetworkError {
    pub fn code(&self) -> u16 {
        match self {
            NetworkError::NetworkDefineFailed { .. } => 2001,
            NetworkError::NetworkStartFailed { .. } => 2002,
            NetworkError::NetworkNotFound { .. } => 2003,
            NetworkError::InvalidNetworkConfig { .. } => 2004,
            NetworkError::DhcpLeaseFailed { .. } => 2005,
            NetworkError::IpAddressNotFound { .. } => 2006,
        }
    }

    pub fn code_name(&self) -> &'static str {
        match self {
            NetworkError::NetworkDefineFailed { .. } => "NETWORK_DEFINE_FAILED",
            NetworkError::NetworkStartFailed { .. } => "NETWORK_START_FAILED",
            NetworkError::NetworkNotFound { .. } => "NETWORK_NOT_FOUND",
            NetworkError::InvalidNetworkConfig { .. } => "INVALID_NETWORK_CONFIG",
            NetworkError::DhcpLeaseFailed { .. } => "DHCP_LEASE_FAILED",
            NetworkError::IpAddressNotFound { .. } => "IP_ADDRESS_NOT_FOUND",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            NetworkError::NetworkDefineFailed { .. } | NetworkError::NetworkStartFailed { .. } => {
                ErrorCategory::Creation
            }
            NetworkError::NetworkNotFound { .. } => ErrorCategory::Resource,
            NetworkError::InvalidNetworkConfig { .. } => ErrorCategory::Configuration,
            NetworkError::DhcpLeaseFailed { .. } | NetworkError::IpAddressNotFound { .. } => {
                ErrorCategory::Network
            }
        }
    }

    pub fn context(&self) -> ErrorContext {
        match self {
            NetworkError::NetworkDefineFailed {
                network_name,
                libvirt_error,
            }
            | NetworkError::NetworkStartFailed {
                network_name,
                libvirt_error,
            }
            | NetworkError::DhcpLeaseFailed {
                network_name,
                libvirt_error,
            } => ctx([
                ("network_name", network_name.clone()),
                ("libvirt_error", libvirt_error.clone()),
            ]),
            NetworkError::NetworkNotFound { network_name } => {
                ctx([("network_name", network_name.clone())])
            }
            NetworkError::InvalidNetworkConfig { value, reason } => {
                ctx([("value", value.clone()), ("reason", reason.clone())])
            }
            NetworkError::IpAddressNotFound {
                vm_name,
                network_name,
            } => ctx([
                ("vm_name", vm_name.clone()),
                ("network_name", network_name.clone()),
            ]),
        }
    }
}

// ============================================================================
// Storage Errors
// ============================================================================

/// Storage pool, golden image and volume failures.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("storage pool '{pool}' not found")]
    PoolNotFound { pool: String },

    #[error("storage pool '{pool}' is not active")]
    PoolInactive { pool: String },

    #[error("failed to look up storage pool '{pool}'")]
    PoolLookupFailed { pool: String, libvirt_error: String },

    #[error("golden base image {path} is missing")]
    BaseImageMissing { path: String },

    #[error("volume '{volume}' already exists in pool '{pool}'")]
    VolumeExists { pool: String, volume: String },

    #[error("failed to create volume '{volume}'")]
    VolumeCreateFailed { volume: String, error: String },
}

impl StorageError {
    pub fn code(&self) -> u16 {
        match self {
            StorageError::PoolNotFound { .. } => 3001,
            StorageError::PoolInactive { .. } => 3002,
            StorageError::PoolLookupFailed { .. } => 3003,
            StorageError::BaseImageMissing { .. } => 3004,
            StorageError::VolumeExists { .. } => 3005,
            StorageError::VolumeCreateFailed { .. } => 3006,
        }
    }

    pub fn code_name(&self) -> &'static str {
        match self {
            StorageError::PoolNotFound { .. } => "STORAGE_POOL_NOT_FOUND",
            StorageError::PoolInactive { .. } => "STORAGE_POOL_INACTIVE",
            StorageError::PoolLookupFailed { .. } => "STORAGE_POOL_LOOKUP_FAILED",
            StorageError::BaseImageMissing { .. } => "BASE_IMAGE_MISSING",
            StorageError::VolumeExists { .. } => "VOLUME_ALREADY_EXISTS",
            StorageError::VolumeCreateFailed { .. } => "VOLUME_CREATE_FAILED",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            StorageError::VolumeExists { .. } | StorageError::VolumeCreateFailed { .. } => {
                ErrorCategory::Creation
            }
            _ => ErrorCategory::Resource,
        }
    }

    pub fn context(&self) -> ErrorContext {
        match self {
            StorageError::PoolNotFound { pool } | StorageError::PoolInactive { pool } => {
                ctx([("pool", pool.clone())])
            }
            StorageError::PoolLookupFailed {
                pool,
                libvirt_error,
            } => ctx([
                ("pool", pool.clone()),
                ("libvirt_error", libvirt_error.clone()),
            ]),
            StorageError::BaseImageMissing { path } => ctx([("path", path.clone())]),
            StorageError::VolumeExists { pool, volume } => {
                ctx([("pool", pool.clone()), ("volume", volume.clone())])
            }
            StorageError::VolumeCreateFailed { volume, error } => {
                ctx([("volume", volume.clone()), ("error", error.clone())])
            }
        }
    }
}

// ============================================================================
// Seed Errors
// ============================================================================

/// First-boot configuration seed failures.
#[derive(Debug, Clone, Error)]
pub enum SeedError {
    #[error("failed to prepare scratch directory under {path}")]
    ScratchDirFailed { path: String, error: String },

    #[error("failed to write seed document '{document}'")]
    DocumentWriteFailed { document: String, error: String },

    #[error("failed to package seed image {output}")]
    PackagingFailed { output: String, tool_output: String },
}

impl SeedError {
    pub fn code(&self) -> u16 {
        match self {
            SeedError::ScratchDirFailed { .. } => 4001,
            SeedError::DocumentWriteFailed { .. } => 4002,
            SeedError::PackagingFailed { .. } => 4003,
        }
    }

    pub fn code_name(&self) -> &'static str {
        match self {
            SeedError::ScratchDirFailed { .. } => "SEED_SCRATCH_FAILED",
            SeedError::DocumentWriteFailed { .. } => "SEED_DOCUMENT_WRITE_FAILED",
            SeedError::PackagingFailed { .. } => "SEED_PACKAGING_FAILED",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            SeedError::ScratchDirFailed { .. } => ErrorCategory::Resource,
            _ => ErrorCategory::Creation,
        }
    }

    pub fn context(&self) -> ErrorContext {
        match self {
            SeedError::ScratchDirFailed { path, error } => {
                ctx([("path", path.clone()), ("error", error.clone())])
            }
            SeedError::DocumentWriteFailed { document, error } => {
                ctx([("document", document.clone()), ("error", error.clone())])
            }
            SeedError::PackagingFailed {
                output,
                tool_output,
            } => ctx([
                ("output", output.clone()),
                ("tool_output", tool_output.clone()),
            ]),
        }
    }
}

// ============================================================================
// Domain Errors
// ============================================================================

/// Guest definition and start failures.
///
/// `DefineFailed` means the description was rejected (malformed or duplicate);
/// `StartFailed` means the host could not run it (resources, device conflict).
#[derive(Debug, Clone, Error)]
pub enum DomainError {
    #[error("domain '{domain}' already exists")]
    AlreadyExists { domain: String },

    #[error("failed to define domain '{domain}'")]
    DefineFailed {
        domain: String,
        libvirt_error: String,
    },

    #[error("failed to start domain '{domain}'")]
    StartFailed {
        domain: String,
        libvirt_error: String,
    },

    #[error("failed to look up domain '{domain}'")]
    LookupFailed {
        domain: String,
        libvirt_error: String,
    },
}

impl DomainError {
    pub fn code(&self) -> u16 {
        match self {
            DomainError::AlreadyExists { .. } => 5001,
            DomainError::DefineFailed { .. } => 5002,
            DomainError::StartFailed { .. } => 5003,
            DomainError::LookupFailed { .. } => 5004,
        }
    }

    pub fn code_name(&self) -> &'static str {
        match self {
            DomainError::AlreadyExists { .. } => "VM_ALREADY_EXISTS",
            DomainError::DefineFailed { .. } => "DOMAIN_DEFINE_FAILED",
            DomainError::StartFailed { .. } => "DOMAIN_START_FAILED",
            DomainError::LookupFailed { .. } => "DOMAIN_LOOKUP_FAILED",
        }
    }

    pub fn context(&self) -> ErrorContext {
        match self {
            DomainError::AlreadyExists { domain } => ctx([("domain", domain.clone())]),
            DomainError::DefineFailed {
                domain,
                libvirt_error,
            }
            | DomainError::StartFailed {
                domain,
                libvirt_error,
            }
            | DomainError::LookupFailed {
                domain,
                libvirt_error,
            } => ctx([
                ("domain", domain.clone()),
                ("libvirt_error", libvirt_error.clone()),
            ]),
        }
    }
}
