//! External tool invocation.
//!
//! Every external process vmforge drives (virsh, qemu-img, genisoimage,
//! ovs-vsctl) goes through [`run_tool`] so that output capture and error
//! text are uniform.

use std::ffi::OsStr;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

/// Failure to run an external tool to completion.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// The process could not be spawned (missing binary, permissions).
    #[error("failed to run {tool}: {error}")]
    Spawn { tool: String, error: String },

    /// The process exited unsuccessfully.
    #[error("{tool} exited with status {status}: {output}")]
    Failed {
        tool: String,
        status: String,
        output: String,
    },
}

impl ToolError {
    /// Captured diagnostic text, suitable for error details.
    pub fn output(&self) -> String {
        match self {
            ToolError::Spawn { error, .. } => error.clone(),
            ToolError::Failed { output, .. } => output.clone(),
        }
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub tool: String,
    pub success: bool,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// stderr if non-empty, otherwise stdout.
    pub fn diagnostics(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }

    /// Convert a non-zero exit into [`ToolError::Failed`], returning stdout otherwise.
    pub fn into_result(self) -> Result<String, ToolError> {
        if self.success {
            Ok(self.stdout)
        } else {
            Err(ToolError::Failed {
                output: self.diagnostics(),
                tool: self.tool,
                status: self.status,
            })
        }
    }
}

/// Run `program` with `args`, capturing stdout and stderr.
///
/// A non-zero exit is NOT an error here; callers inspect [`ToolOutput::success`]
/// or use [`ToolOutput::into_result`].
pub async fn run_tool<I, S>(program: impl AsRef<OsStr>, args: I) -> Result<ToolOutput, ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = program.as_ref();
    let tool = program.to_string_lossy().into_owned();

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::trace!(tool = %tool, "Running external tool");

    let output = cmd.output().await.map_err(|e| ToolError::Spawn {
        tool: tool.clone(),
        error: e.to_string(),
    })?;

    let status = match output.status.code() {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    };

    Ok(ToolOutput {
        tool,
        success: output.status.success(),
        status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
