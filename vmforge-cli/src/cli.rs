use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vmforge::{HomeLockMode, VmManager, VmforgeOptions, VmforgeResult};

use crate::commands::{address::AddressArgs, create::CreateArgs, network::NetworkArgs};

#[derive(Parser, Debug)]
#[command(name = "vmforge", version)]
#[command(about = "Provision per-user isolated VMs on a libvirt host", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create and start a VM, printing its access details as JSON
    Create(CreateArgs),

    /// Ensure a user's isolation network exists and is active
    Network(NetworkArgs),

    /// Query the address lease of a VM
    Address(AddressArgs),
}

#[derive(Args, Debug)]
pub struct GlobalFlags {
    /// State directory (lock, logs, staging)
    #[arg(long, global = true, env = "VMFORGE_HOME")]
    pub home: Option<PathBuf>,

    /// JSON options file
    #[arg(long, global = true, env = "VMFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Hypervisor connection URI
    #[arg(long, global = true)]
    pub uri: Option<String>,

    /// Storage pool for derived volumes
    #[arg(long, global = true)]
    pub pool: Option<String>,

    /// Golden base image
    #[arg(long, global = true)]
    pub base_image: Option<PathBuf>,

    /// Log level for stderr output (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,
}

impl GlobalFlags {
    /// Log to stderr so stdout stays machine-readable.
    pub fn init_tracing(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.log_level));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }

    /// Resolve options from the config file and flags.
    ///
    /// The CLI holds its home in shared mode so concurrent commands run side
    /// by side; only a long-lived exclusive manager refuses them.
    pub fn options(&self) -> VmforgeResult<VmforgeOptions> {
        let mut options = match &self.config {
            Some(path) => VmforgeOptions::from_file(path)?,
            None => VmforgeOptions::default(),
        };
        if let Some(home) = &self.home {
            options.home_dir = home.clone();
        }
        if let Some(uri) = &self.uri {
            options.libvirt_uri = uri.clone();
        }
        if let Some(pool) = &self.pool {
            options.storage_pool = pool.clone();
        }
        if let Some(base_image) = &self.base_image {
            options.base_image = base_image.clone();
        }
        options.home_lock = HomeLockMode::Shared;
        Ok(options)
    }

    pub fn create_manager(&self) -> VmforgeResult<VmManager> {
        VmManager::with_virsh(self.options()?)
    }
}
