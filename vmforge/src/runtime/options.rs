//! Configuration for vmforge.

use crate::hypervisor::SwitchMode;
use crate::runtime::constants::{envs, guest_defaults, host_defaults, lease_poll, limits};
use crate::runtime::layout::dirs as const_dirs;
pub use crate::runtime::lock::HomeLockMode;
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vmforge_shared::{ConfigError, VmforgeResult};

// ============================================================================
// Resource Limits
// ============================================================================

/// Inclusive bounds on the compute shape a request may ask for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default = "default_min_cpus")]
    pub min_cpus: u32,
    #[serde(default = "default_max_cpus")]
    pub max_cpus: u32,
    #[serde(default = "default_min_memory_mb")]
    pub min_memory_mb: u64,
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
    #[serde(default = "default_min_disk_gb")]
    pub min_disk_gb: u64,
    #[serde(default = "default_max_disk_gb")]
    pub max_disk_gb: u64,
}

fn default_min_cpus() -> u32 {
    limits::MIN_CPUS
}

fn default_max_cpus() -> u32 {
    limits::MAX_CPUS
}

fn default_min_memory_mb() -> u64 {
    limits::MIN_MEMORY_MB
}

fn default_max_memory_mb() -> u64 {
    limits::MAX_MEMORY_MB
}

fn default_min_disk_gb() -> u64 {
    limits::MIN_DISK_GB
}

fn default_max_disk_gb() -> u64 {
    limits::MAX_DISK_GB
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            min_cpus: default_min_cpus(),
            max_cpus: default_max_cpus(),
            min_memory_mb: default_min_memory_mb(),
            max_memory_mb: default_max_memory_mb(),
            min_disk_gb: default_min_disk_gb(),
            max_disk_gb: default_max_disk_gb(),
        }
    }
}

impl ResourceLimits {
    fn sanitize(&self) -> Result<(), ConfigError> {
        let ranges = [
            ("cpu", u64::from(self.min_cpus), u64::from(self.max_cpus)),
            ("memory", self.min_memory_mb, self.max_memory_mb),
            ("disk", self.min_disk_gb, self.max_disk_gb),
        ];
        for (name, min, max) in ranges {
            if min == 0 || min > max {
                return Err(ConfigError::InvalidOptions(format!(
                    "{} limits must satisfy 0 < min <= max (got {}..={})",
                    name, min, max
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Lease Poll Policy
// ============================================================================

/// Bounded exponential backoff for address lease polling.
///
/// Polling stops at whichever comes first: `max_attempts` queries, or
/// `deadline_ms` elapsed since the first query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeasePollPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
}

fn default_max_attempts() -> u32 {
    lease_poll::MAX_ATTEMPTS
}

fn default_initial_delay_ms() -> u64 {
    lease_poll::INITIAL_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    lease_poll::MAX_DELAY_MS
}

fn default_multiplier() -> u32 {
    lease_poll::MULTIPLIER
}

fn default_deadline_ms() -> u64 {
    lease_poll::DEADLINE_MS
}

impl Default for LeasePollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            deadline_ms: default_deadline_ms(),
        }
    }
}

impl LeasePollPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let factor = u64::from(self.multiplier).saturating_pow(exp);
        let ms = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    fn sanitize(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidOptions(
                "lease_poll.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.multiplier == 0 {
            return Err(ConfigError::InvalidOptions(
                "lease_poll.multiplier must be at least 1".to_string(),
            ));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ConfigError::InvalidOptions(
                "lease_poll.initial_delay_ms must not exceed max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Rollback Policy
// ============================================================================

/// What happens to a domain and its volumes when definition or start fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPolicy {
    /// Undefine the domain and delete both volumes.
    #[default]
    Rollback,
    /// Leave the domain and volumes in place for inspection or retry.
    Preserve,
}

// ============================================================================
// Runtime Options
// ============================================================================

/// Configuration options for [`VmManager`](crate::runtime::VmManager).
///
/// Every field has a default, so a partial JSON file is accepted:
///
/// ```json
/// { "storage_pool": "vmforge", "rollback": "preserve" }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VmforgeOptions {
    /// State directory (lock, logs, staging). `VMFORGE_HOME` or `~/.vmforge`.
    #[serde(default = "default_home_dir")]
    pub home_dir: PathBuf,

    #[serde(default = "default_libvirt_uri")]
    pub libvirt_uri: String,

    /// Pool every derived volume is placed in.
    #[serde(default = "default_storage_pool")]
    pub storage_pool: String,

    /// Golden image. Read, never written.
    #[serde(default = "default_base_image")]
    pub base_image: PathBuf,

    /// Root for per-request scratch directories. Defaults to `<home>/tmp`.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    #[serde(default = "default_guest_username")]
    pub guest_username: String,

    #[serde(default = "default_secret_length")]
    pub secret_length: usize,

    #[serde(default)]
    pub resource_limits: ResourceLimits,

    #[serde(default)]
    pub lease_poll: LeasePollPolicy,

    #[serde(default)]
    pub rollback: RollbackPolicy,

    #[serde(default)]
    pub switch_mode: SwitchMode,

    /// Whether other managers may share the home directory.
    #[serde(default)]
    pub home_lock: HomeLockMode,
}

fn default_home_dir() -> PathBuf {
    std::env::var(envs::VMFORGE_HOME)
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let mut path = home_dir().unwrap_or_else(|| PathBuf::from("."));
            path.push(const_dirs::VMFORGE_DIR);
            path
        })
}

fn default_libvirt_uri() -> String {
    host_defaults::LIBVIRT_URI.to_string()
}

fn default_storage_pool() -> String {
    host_defaults::STORAGE_POOL.to_string()
}

fn default_base_image() -> PathBuf {
    PathBuf::from(host_defaults::BASE_IMAGE)
}

fn default_guest_username() -> String {
    guest_defaults::USERNAME.to_string()
}

fn default_secret_length() -> usize {
    guest_defaults::SECRET_LENGTH
}

impl Default for VmforgeOptions {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
            libvirt_uri: default_libvirt_uri(),
            storage_pool: default_storage_pool(),
            base_image: default_base_image(),
            scratch_dir: None,
            guest_username: default_guest_username(),
            secret_length: default_secret_length(),
            resource_limits: ResourceLimits::default(),
            lease_poll: LeasePollPolicy::default(),
            rollback: RollbackPolicy::default(),
            switch_mode: SwitchMode::default(),
            home_lock: HomeLockMode::default(),
        }
    }
}

impl VmforgeOptions {
    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> VmforgeResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::InvalidOptions(format!("failed to read {}: {}", path.display(), e))
        })?;
        let options: VmforgeOptions = serde_json::from_str(&raw).map_err(|e| {
            ConfigError::InvalidOptions(format!("failed to parse {}: {}", path.display(), e))
        })?;
        options.sanitize()?;
        Ok(options)
    }

    pub fn builder() -> VmforgeOptionsBuilder {
        VmforgeOptionsBuilder::new()
    }

    /// Validate option combinations.
    pub fn sanitize(&self) -> VmforgeResult<()> {
        if self.libvirt_uri.trim().is_empty() {
            return Err(ConfigError::InvalidOptions("libvirt_uri must not be empty".into()).into());
        }
        if self.storage_pool.trim().is_empty() {
            return Err(ConfigError::InvalidOptions("storage_pool must not be empty".into()).into());
        }
        if !is_valid_username(&self.guest_username) {
            return Err(ConfigError::InvalidOptions(format!(
                "guest_username '{}' is not a valid login name",
                self.guest_username
            ))
            .into());
        }
        if self.secret_length < guest_defaults::MIN_SECRET_LENGTH {
            return Err(ConfigError::InvalidOptions(format!(
                "secret_length must be at least {}",
                guest_defaults::MIN_SECRET_LENGTH
            ))
            .into());
        }
        self.resource_limits.sanitize()?;
        self.lease_poll.sanitize()?;
        Ok(())
    }

    /// Effective scratch root.
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| self.home_dir.join(const_dirs::TMP_DIR))
    }
}

/// Lowercase POSIX login name: `[a-z_][a-z0-9_-]{0,31}`.
fn is_valid_username(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 32
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

// ============================================================================
// Options Builder (non-consuming)
// ============================================================================

/// Builder for [`VmforgeOptions`].
///
/// ```
/// use vmforge::runtime::options::{RollbackPolicy, VmforgeOptionsBuilder};
///
/// let options = VmforgeOptionsBuilder::new()
///     .storage_pool("vmforge")
///     .rollback(RollbackPolicy::Preserve)
///     .build();
/// assert_eq!(options.storage_pool, "vmforge");
/// ```
#[derive(Debug, Clone)]
pub struct VmforgeOptionsBuilder {
    inner: VmforgeOptions,
}

impl Default for VmforgeOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl VmforgeOptionsBuilder {
    pub fn new() -> Self {
        Self {
            inner: VmforgeOptions::default(),
        }
    }

    pub fn home_dir(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.inner.home_dir = path.into();
        self
    }

    pub fn libvirt_uri(&mut self, uri: impl Into<String>) -> &mut Self {
        self.inner.libvirt_uri = uri.into();
        self
    }

    pub fn storage_pool(&mut self, pool: impl Into<String>) -> &mut Self {
        self.inner.storage_pool = pool.into();
        self
    }

    pub fn base_image(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.inner.base_image = path.into();
        self
    }

    pub fn scratch_dir(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.inner.scratch_dir = Some(path.into());
        self
    }

    pub fn guest_username(&mut self, name: impl Into<String>) -> &mut Self {
        self.inner.guest_username = name.into();
        self
    }

    pub fn secret_length(&mut self, len: usize) -> &mut Self {
        self.inner.secret_length = len;
        self
    }

    pub fn resource_limits(&mut self, limits: ResourceLimits) -> &mut Self {
        self.inner.resource_limits = limits;
        self
    }

    pub fn lease_poll(&mut self, policy: LeasePollPolicy) -> &mut Self {
        self.inner.lease_poll = policy;
        self
    }

    pub fn rollback(&mut self, policy: RollbackPolicy) -> &mut Self {
        self.inner.rollback = policy;
        self
    }

    pub fn switch_mode(&mut self, mode: SwitchMode) -> &mut Self {
        self.inner.switch_mode = mode;
        self
    }

    pub fn home_lock(&mut self, mode: HomeLockMode) -> &mut Self {
        self.inner.home_lock = mode;
        self
    }

    pub fn build(&self) -> VmforgeOptions {
        self.inner.clone()
    }
}
