//! Shared fixtures for vmforge tests.
//!
//! [`FakeControlPlane`] keeps networks, pools, domains and leases in memory
//! and counts every call, so tests can assert both outcomes and which
//! external operations were (or were not) issued.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use vmforge::hypervisor::{
    Backends, Connection, ControlPlaneError, ControlPlaneResult, DiskCloner, DomainControl,
    IsolationSwitch, Lease, NetworkControl, NetworkInfo, NoSwitch, PoolInfo, SeedPackager,
    StoragePoolControl,
};
use vmforge::net::IsolationTag;
use vmforge::util::process::ToolError;
use vmforge::{LeasePollPolicy, RollbackPolicy, VmManager, VmforgeOptions};
use vmforge_shared::VmforgeResult;

pub const TEST_URI: &str = "test:///fake";
pub const TEST_POOL: &str = "default";

// ============================================================================
// Fake control plane
// ============================================================================

/// When started domains receive a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseMode {
    /// As soon as the domain is running.
    Immediate,
    /// After the network's lease list has been queried this many times.
    AfterQueries(usize),
    /// Never; polling exhausts its budget.
    Never,
    /// Every lease query is rejected.
    QueryFails,
}

#[derive(Debug, Clone)]
pub struct FakeDomain {
    pub xml: String,
    pub network: Option<String>,
    pub mac: Option<String>,
    pub running: bool,
    /// Address handed out when the domain started.
    pub lease: Option<Ipv4Addr>,
}

#[derive(Debug, Clone)]
struct FakeNetwork {
    info: NetworkInfo,
    xml: String,
    dhcp_start: Option<Ipv4Addr>,
    handed_out: u32,
}

#[derive(Default)]
struct State {
    networks: BTreeMap<String, FakeNetwork>,
    pools: HashMap<String, PoolInfo>,
    domains: BTreeMap<String, FakeDomain>,
    lease_queries: HashMap<String, usize>,
    calls: HashMap<&'static str, usize>,
}

#[derive(Default)]
struct Faults {
    unreachable: bool,
    reject_network_define: Option<String>,
    reject_network_start: Option<String>,
    reject_domain_define: Option<String>,
    reject_domain_start: Option<String>,
    reject_volume_delete: Option<String>,
    network_define_delay: Option<Duration>,
    network_defined_elsewhere: bool,
    network_started_elsewhere: bool,
}

/// In-memory hypervisor control plane.
pub struct FakeControlPlane {
    state: Mutex<State>,
    faults: Mutex<Faults>,
    lease_mode: Mutex<LeaseMode>,
}

impl Default for FakeControlPlane {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            faults: Mutex::new(Faults::default()),
            lease_mode: Mutex::new(LeaseMode::Immediate),
        }
    }
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an active pool backed by `path`.
    pub fn with_pool(self, name: &str, path: &Path) -> Self {
        self.add_pool(name, path, true);
        self
    }

    pub fn add_pool(&self, name: &str, path: &Path, active: bool) {
        self.state.lock().pools.insert(
            name.to_string(),
            PoolInfo {
                name: name.to_string(),
                path: path.to_path_buf(),
                active,
            },
        );
    }

    pub fn remove_pool(&self, name: &str) {
        self.state.lock().pools.remove(name);
    }

    /// Pretend a domain was defined out of band.
    pub fn add_domain(&self, name: &str) {
        self.state.lock().domains.insert(
            name.to_string(),
            FakeDomain {
                xml: String::new(),
                network: None,
                mac: None,
                running: false,
                lease: None,
            },
        );
    }

    /// Pretend a network was defined out of band.
    pub fn add_network(&self, name: &str, active: bool) {
        self.state.lock().networks.insert(
            name.to_string(),
            FakeNetwork {
                info: NetworkInfo {
                    name: name.to_string(),
                    bridge: None,
                    active,
                    autostart: false,
                },
                xml: String::new(),
                dhcp_start: None,
                handed_out: 0,
            },
        );
    }

    pub fn set_lease_mode(&self, mode: LeaseMode) {
        *self.lease_mode.lock() = mode;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.faults.lock().unreachable = unreachable;
    }

    pub fn reject_network_define(&self, error: &str) {
        self.faults.lock().reject_network_define = Some(error.to_string());
    }

    pub fn reject_network_start(&self, error: &str) {
        self.faults.lock().reject_network_start = Some(error.to_string());
    }

    pub fn reject_domain_define(&self, error: &str) {
        self.faults.lock().reject_domain_define = Some(error.to_string());
    }

    pub fn accept_domain_define(&self) {
        self.faults.lock().reject_domain_define = None;
    }

    pub fn reject_volume_delete(&self, error: &str) {
        self.faults.lock().reject_volume_delete = Some(error.to_string());
    }

    /// Make the next network definition lose a race: the network appears
    /// active as if another process defined it, and the define is rejected.
    pub fn define_network_elsewhere(&self) {
        self.faults.lock().network_defined_elsewhere = true;
    }

    /// Make the next network start lose a race: the network becomes active
    /// and the start is rejected.
    pub fn start_network_elsewhere(&self) {
        self.faults.lock().network_started_elsewhere = true;
    }

    pub fn reject_domain_start(&self, error: &str) {
        self.faults.lock().reject_domain_start = Some(error.to_string());
    }

    /// Slow down network definition to widen race windows.
    pub fn delay_network_define(&self, delay: Duration) {
        self.faults.lock().network_define_delay = Some(delay);
    }

    /// Number of calls made to `op` (the trait method name).
    pub fn calls(&self, op: &str) -> usize {
        self.state.lock().calls.get(op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.values().sum()
    }

    pub fn network(&self, name: &str) -> Option<NetworkInfo> {
        self.state.lock().networks.get(name).map(|n| n.info.clone())
    }

    pub fn network_xml(&self, name: &str) -> Option<String> {
        self.state.lock().networks.get(name).map(|n| n.xml.clone())
    }

    pub fn network_names(&self) -> Vec<String> {
        self.state.lock().networks.keys().cloned().collect()
    }

    pub fn domain(&self, name: &str) -> Option<FakeDomain> {
        self.state.lock().domains.get(name).cloned()
    }

    pub fn domain_names(&self) -> Vec<String> {
        self.state.lock().domains.keys().cloned().collect()
    }

    fn record(&self, op: &'static str) -> ControlPlaneResult<()> {
        *self.state.lock().calls.entry(op).or_default() += 1;
        if self.faults.lock().unreachable {
            return Err(ControlPlaneError::Unreachable(format!(
                "failed to connect to the hypervisor at {}",
                TEST_URI
            )));
        }
        Ok(())
    }
}

/// Text of the first `attr="…"` following `element` in `xml`.
fn xml_attr(xml: &str, element: &str, attr: &str) -> Option<String> {
    let start = xml.find(element)?;
    let rest = &xml[start..];
    let needle = format!("{}=\"", attr);
    let at = rest.find(&needle)? + needle.len();
    let end = rest[at..].find('"')?;
    Some(rest[at..at + end].to_string())
}

fn xml_name(xml: &str) -> Option<String> {
    let start = xml.find("<name>")? + "<name>".len();
    let end = xml[start..].find("</name>")?;
    Some(xml[start..start + end].to_string())
}

#[async_trait]
impl Connection for FakeControlPlane {
    fn uri(&self) -> &str {
        TEST_URI
    }

    async fn ping(&self) -> ControlPlaneResult<()> {
        self.record("ping")
    }
}

#[async_trait]
impl NetworkControl for FakeControlPlane {
    async fn lookup_network(&self, name: &str) -> ControlPlaneResult<Option<NetworkInfo>> {
        self.record("lookup_network")?;
        Ok(self.network(name))
    }

    async fn define_network(&self, xml: &str) -> ControlPlaneResult<()> {
        self.record("define_network")?;
        let (reject, delay, elsewhere) = {
            let mut faults = self.faults.lock();
            (
                faults.reject_network_define.clone(),
                faults.network_define_delay,
                std::mem::take(&mut faults.network_defined_elsewhere),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = reject {
            return Err(ControlPlaneError::Rejected(error));
        }

        let name = xml_name(xml)
            .ok_or_else(|| ControlPlaneError::Rejected("network XML has no name".into()))?;
        if elsewhere {
            self.add_network(&name, true);
        }
        let mut state = self.state.lock();
        if state.networks.contains_key(&name) {
            return Err(ControlPlaneError::Rejected(format!(
                "operation failed: network '{}' already exists",
                name
            )));
        }
        state.networks.insert(
            name.clone(),
            FakeNetwork {
                info: NetworkInfo {
                    name,
                    bridge: xml_attr(xml, "<bridge", "name"),
                    active: false,
                    autostart: false,
                },
                xml: xml.to_string(),
                dhcp_start: xml_attr(xml, "<range", "start").and_then(|s| s.parse().ok()),
                handed_out: 0,
            },
        );
        Ok(())
    }

    async fn start_network(&self, name: &str) -> ControlPlaneResult<()> {
        self.record("start_network")?;
        let (reject, elsewhere) = {
            let mut faults = self.faults.lock();
            (
                faults.reject_network_start.clone(),
                std::mem::take(&mut faults.network_started_elsewhere),
            )
        };
        if let Some(error) = reject {
            return Err(ControlPlaneError::Rejected(error));
        }
        let mut state = self.state.lock();
        let network = state
            .networks
            .get_mut(name)
            .ok_or_else(|| ControlPlaneError::Rejected(format!("network '{}' not found", name)))?;
        network.info.active = true;
        if elsewhere {
            return Err(ControlPlaneError::Rejected(
                "Requested operation is not valid: network is already active".into(),
            ));
        }
        Ok(())
    }

    async fn set_network_autostart(&self, name: &str) -> ControlPlaneResult<()> {
        self.record("set_network_autostart")?;
        if let Some(network) = self.state.lock().networks.get_mut(name) {
            network.info.autostart = true;
        }
        Ok(())
    }

    async fn list_leases(&self, network: &str) -> ControlPlaneResult<Vec<Lease>> {
        self.record("list_leases")?;
        let mode = *self.lease_mode.lock();

        let mut state = self.state.lock();
        let queries = {
            let count = state.lease_queries.entry(network.to_string()).or_default();
            *count += 1;
            *count
        };

        let assign = match mode {
            LeaseMode::Immediate => true,
            LeaseMode::AfterQueries(n) => queries > n,
            LeaseMode::Never => false,
            LeaseMode::QueryFails => {
                return Err(ControlPlaneError::Rejected(format!(
                    "failed to get leases for network '{}'",
                    network
                )));
            }
        };
        if !assign {
            return Ok(Vec::new());
        }

        Ok(state
            .domains
            .iter()
            .filter(|(_, d)| d.running && d.network.as_deref() == Some(network))
            .filter_map(|(name, d)| {
                d.lease.map(|ip| Lease {
                    mac: d.mac.clone().unwrap_or_default(),
                    ip,
                    prefix: 24,
                    hostname: Some(name.clone()),
                    expiry: None,
                })
            })
            .collect())
    }
}

#[async_trait]
impl StoragePoolControl for FakeControlPlane {
    async fn lookup_pool(&self, name: &str) -> ControlPlaneResult<Option<PoolInfo>> {
        self.record("lookup_pool")?;
        Ok(self.state.lock().pools.get(name).cloned())
    }

    async fn refresh_pool(&self, _name: &str) -> ControlPlaneResult<()> {
        self.record("refresh_pool")
    }

    async fn delete_volume(&self, pool: &str, volume: &str) -> ControlPlaneResult<()> {
        self.record("delete_volume")?;
        if let Some(error) = self.faults.lock().reject_volume_delete.clone() {
            return Err(ControlPlaneError::Rejected(error));
        }
        let path = self
            .state
            .lock()
            .pools
            .get(pool)
            .map(|p| p.path.join(volume))
            .ok_or_else(|| ControlPlaneError::Rejected(format!("pool '{}' not found", pool)))?;
        std::fs::remove_file(&path).map_err(|e| ControlPlaneError::Rejected(e.to_string()))
    }
}

#[async_trait]
impl DomainControl for FakeControlPlane {
    async fn domain_exists(&self, name: &str) -> ControlPlaneResult<bool> {
        self.record("domain_exists")?;
        Ok(self.state.lock().domains.contains_key(name))
    }

    async fn define_domain(&self, xml: &str) -> ControlPlaneResult<()> {
        self.record("define_domain")?;
        if let Some(error) = self.faults.lock().reject_domain_define.clone() {
            return Err(ControlPlaneError::Rejected(error));
        }
        let name = xml_name(xml)
            .ok_or_else(|| ControlPlaneError::Rejected("domain XML has no name".into()))?;
        let mut state = self.state.lock();
        if state.domains.contains_key(&name) {
            return Err(ControlPlaneError::Rejected(format!(
                "operation failed: domain '{}' already exists",
                name
            )));
        }
        state.domains.insert(
            name,
            FakeDomain {
                xml: xml.to_string(),
                network: xml_attr(xml, "<source network", "network"),
                mac: xml_attr(xml, "<mac", "address"),
                running: false,
                lease: None,
            },
        );
        Ok(())
    }

    async fn start_domain(&self, name: &str) -> ControlPlaneResult<()> {
        self.record("start_domain")?;
        if let Some(error) = self.faults.lock().reject_domain_start.clone() {
            return Err(ControlPlaneError::Rejected(error));
        }
        let mut state = self.state.lock();
        let State {
            domains, networks, ..
        } = &mut *state;
        let domain = domains
            .get_mut(name)
            .ok_or_else(|| ControlPlaneError::Rejected(format!("domain '{}' not found", name)))?;
        domain.running = true;

        if domain.lease.is_none()
            && let Some(network_name) = domain.network.as_deref()
            && let Some(network) = networks.get_mut(network_name)
            && let Some(start) = network.dhcp_start
        {
            domain.lease = Some(Ipv4Addr::from(u32::from(start) + network.handed_out));
            network.handed_out += 1;
        }
        Ok(())
    }

    async fn undefine_domain(&self, name: &str) -> ControlPlaneResult<()> {
        self.record("undefine_domain")?;
        self.state
            .lock()
            .domains
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ControlPlaneError::Rejected(format!("domain '{}' not found", name)))
    }
}

// ============================================================================
// Fake tools
// ============================================================================

type CloneHook = Box<dyn Fn() + Send + Sync>;

/// Copies the base image byte for byte; never resizes.
#[derive(Default)]
pub struct FakeDiskCloner {
    fail_with: Mutex<Option<String>>,
    after_clone: Mutex<Option<CloneHook>>,
    clones: AtomicUsize,
}

impl FakeDiskCloner {
    pub fn fail_with(&self, output: &str) {
        *self.fail_with.lock() = Some(output.to_string());
    }

    /// Run `hook` after every successful clone.
    pub fn after_clone(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.after_clone.lock() = Some(Box::new(hook));
    }

    pub fn clones(&self) -> usize {
        self.clones.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiskCloner for FakeDiskCloner {
    async fn clone_disk(
        &self,
        base: &Path,
        target: &Path,
        _min_size_bytes: u64,
    ) -> Result<(), ToolError> {
        if let Some(output) = self.fail_with.lock().clone() {
            return Err(ToolError::Failed {
                tool: "qemu-img".into(),
                status: "exit status: 1".into(),
                output,
            });
        }
        std::fs::copy(base, target).map_err(|e| ToolError::Spawn {
            tool: "qemu-img".into(),
            error: e.to_string(),
        })?;
        self.clones.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.after_clone.lock().as_ref() {
            hook();
        }
        Ok(())
    }
}

/// Concatenates the input documents, each preceded by its file name.
///
/// Output bytes depend only on input contents, so two packagings of the
/// same documents are identical.
#[derive(Default)]
pub struct FakeSeedPackager {
    fail_with: Mutex<Option<String>>,
    packaged: Mutex<Vec<PathBuf>>,
}

impl FakeSeedPackager {
    pub fn fail_with(&self, output: &str) {
        *self.fail_with.lock() = Some(output.to_string());
    }

    /// Output paths of every successful packaging, in order.
    pub fn packaged(&self) -> Vec<PathBuf> {
        self.packaged.lock().clone()
    }
}

#[async_trait]
impl SeedPackager for FakeSeedPackager {
    async fn package(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ToolError> {
        if let Some(output) = self.fail_with.lock().clone() {
            return Err(ToolError::Failed {
                tool: "genisoimage".into(),
                status: "exit status: 1".into(),
                output,
            });
        }
        let mut image = String::new();
        for input in inputs {
            let body = std::fs::read_to_string(input).map_err(|e| ToolError::Spawn {
                tool: "genisoimage".into(),
                error: e.to_string(),
            })?;
            let name = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            image.push_str(&format!("--- {}\n{}", name, body));
        }
        std::fs::write(output, image).map_err(|e| ToolError::Spawn {
            tool: "genisoimage".into(),
            error: e.to_string(),
        })?;
        self.packaged.lock().push(output.to_path_buf());
        Ok(())
    }
}

/// Records every enforcement.
#[derive(Default)]
pub struct RecordingSwitch {
    enforced: Mutex<Vec<(String, IsolationTag)>>,
}

impl RecordingSwitch {
    pub fn enforced(&self) -> Vec<(String, IsolationTag)> {
        self.enforced.lock().clone()
    }
}

#[async_trait]
impl IsolationSwitch for RecordingSwitch {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn enforce(&self, bridge: &str, tag: IsolationTag) -> Result<(), ToolError> {
        self.enforced.lock().push((bridge.to_string(), tag));
        Ok(())
    }
}

// ============================================================================
// Test context
// ============================================================================

/// Lease polling fast enough for tests.
pub fn fast_lease_poll() -> LeasePollPolicy {
    LeasePollPolicy {
        max_attempts: 5,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        multiplier: 2,
        deadline_ms: 2_000,
    }
}

/// Temporary home, storage pool and golden image wired to fakes.
pub struct TestContext {
    pub temp: TempDir,
    pub control_plane: Arc<FakeControlPlane>,
    pub disk_cloner: Arc<FakeDiskCloner>,
    pub seed_packager: Arc<FakeSeedPackager>,
    pub switch: Arc<dyn IsolationSwitch>,
    pub options: VmforgeOptions,
}

impl TestContext {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("create temp dir");
        let pool_dir = temp.path().join("pool");
        std::fs::create_dir_all(&pool_dir).expect("create pool dir");

        let base_image = temp.path().join("base.qcow2");
        std::fs::write(&base_image, b"QFI\xfb golden image").expect("write golden image");

        let control_plane = Arc::new(FakeControlPlane::new().with_pool(TEST_POOL, &pool_dir));

        let options = VmforgeOptions::builder()
            .home_dir(temp.path().join("home"))
            .libvirt_uri(TEST_URI)
            .storage_pool(TEST_POOL)
            .base_image(&base_image)
            .lease_poll(fast_lease_poll())
            .rollback(RollbackPolicy::Rollback)
            .build();

        Self {
            temp,
            control_plane,
            disk_cloner: Arc::new(FakeDiskCloner::default()),
            seed_packager: Arc::new(FakeSeedPackager::default()),
            switch: Arc::new(NoSwitch),
            options,
        }
    }

    pub fn pool_dir(&self) -> PathBuf {
        self.temp.path().join("pool")
    }

    pub fn base_image(&self) -> PathBuf {
        self.options.base_image.clone()
    }

    /// File names currently in the pool directory, sorted.
    pub fn pool_volumes(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.pool_dir())
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Entries left under the scratch root.
    pub fn scratch_entries(&self) -> usize {
        std::fs::read_dir(self.options.scratch_root())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    pub fn backends(&self) -> Backends {
        Backends {
            control_plane: self.control_plane.clone(),
            disk_cloner: self.disk_cloner.clone(),
            seed_packager: self.seed_packager.clone(),
            switch: self.switch.clone(),
        }
    }

    pub fn manager(&self) -> VmforgeResult<VmManager> {
        VmManager::new(self.options.clone(), self.backends())
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
