use serde::{Deserialize, Serialize};

/// Lifecycle status of a VM record.
///
/// ```text
/// Creating ──→ Running
///     └──────→ Failed
/// ```
///
/// Both `Running` and `Failed` are terminal for one provisioning pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    /// Provisioning in progress.
    Creating,
    /// Domain defined and started.
    Running,
    /// Provisioning stopped before the domain was running.
    Failed,
}

impl VmStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, VmStatus::Running | VmStatus::Failed)
    }

    /// Status only ever moves forward.
    pub fn can_transition_to(&self, target: VmStatus) -> bool {
        use VmStatus::*;
        matches!((self, target), (Creating, Running) | (Creating, Failed))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VmStatus::Creating => "creating",
            VmStatus::Running => "running",
            VmStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for VmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
