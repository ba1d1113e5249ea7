//! Software switch collaborator.
//!
//! Single-host deployments isolate users purely through the hypervisor's
//! virtual networks and use [`NoSwitch`]. Multi-host deployments also tag the
//! bridge on an Open vSwitch instance with [`OvsVsctl`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::IsolationSwitch;
use crate::net::IsolationTag;
use crate::util::process::{ToolError, run_tool};

/// Which switch collaborator a manager uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchMode {
    /// Hypervisor networks only.
    #[default]
    None,
    /// Additionally tag bridges on Open vSwitch.
    OpenVswitch,
}

/// No external switch; isolation comes from the virtual network alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSwitch;

#[async_trait]
impl IsolationSwitch for NoSwitch {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn enforce(&self, _bridge: &str, _tag: IsolationTag) -> Result<(), ToolError> {
        Ok(())
    }
}

/// Tags the per-user bridge with its isolation tag via `ovs-vsctl`.
#[derive(Debug, Clone)]
pub struct OvsVsctl {
    binary: PathBuf,
    /// Integration bridge the per-user bridges are patched into.
    uplink_bridge: String,
}

impl Default for OvsVsctl {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ovs-vsctl"),
            uplink_bridge: "br-vmforge".to_string(),
        }
    }
}

impl OvsVsctl {
    pub fn new(binary: impl Into<PathBuf>, uplink_bridge: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            uplink_bridge: uplink_bridge.into(),
        }
    }

    fn commands(&self, bridge: &str, tag: IsolationTag) -> Vec<Vec<String>> {
        vec![
            vec![
                "--may-exist".into(),
                "add-br".into(),
                self.uplink_bridge.clone(),
            ],
            vec![
                "--may-exist".into(),
                "add-port".into(),
                self.uplink_bridge.clone(),
                bridge.to_string(),
            ],
            vec![
                "set".into(),
                "port".into(),
                bridge.to_string(),
                format!("tag={}", tag.value()),
            ],
        ]
    }
}

#[async_trait]
impl IsolationSwitch for OvsVsctl {
    fn name(&self) -> &'static str {
        "openvswitch"
    }

    async fn enforce(&self, bridge: &str, tag: IsolationTag) -> Result<(), ToolError> {
        for args in self.commands(bridge, tag) {
            run_tool(&self.binary, &args).await?.into_result()?;
        }
        tracing::info!(bridge = %bridge, tag = %tag, "Bridge tagged on software switch");
        Ok(())
    }
}
