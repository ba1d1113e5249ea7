//! Disk derivation through the external `qemu-img` binary.

use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use super::DiskCloner;
use crate::util::process::{ToolError, run_tool};

/// Subset of `qemu-img info --output=json`.
#[derive(Debug, Deserialize)]
struct ImageInfo {
    #[serde(rename = "virtual-size")]
    virtual_size: u64,
    format: String,
}

/// Copies the golden image into a standalone qcow2 volume.
///
/// The copy is a full conversion, not a backing-file overlay, so the derived
/// volume survives changes to (or removal of) the golden image.
#[derive(Debug, Clone)]
pub struct QemuImg {
    binary: PathBuf,
}

impl Default for QemuImg {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("qemu-img"),
        }
    }
}

impl QemuImg {
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn info(&self, path: &Path) -> Result<ImageInfo, ToolError> {
        let stdout = run_tool(
            &self.binary,
            [
                OsStr::new("info"),
                OsStr::new("--output=json"),
                path.as_os_str(),
            ],
        )
        .await?
        .into_result()?;

        parse_info(&stdout).map_err(|e| ToolError::Failed {
            tool: self.binary.display().to_string(),
            status: "0".to_string(),
            output: format!("unparseable image info for {}: {}", path.display(), e),
        })
    }
}

#[async_trait]
impl DiskCloner for QemuImg {
    async fn clone_disk(
        &self,
        base: &Path,
        target: &Path,
        min_size_bytes: u64,
    ) -> Result<(), ToolError> {
        tracing::info!(
            base = %base.display(),
            target = %target.display(),
            "Converting golden image into qcow2 volume"
        );

        run_tool(
            &self.binary,
            [
                OsStr::new("convert"),
                OsStr::new("-O"),
                OsStr::new("qcow2"),
                base.as_os_str(),
                target.as_os_str(),
            ],
        )
        .await?
        .into_result()?;

        let info = self.info(target).await?;
        tracing::debug!(
            target = %target.display(),
            format = %info.format,
            virtual_size = info.virtual_size,
            "Derived volume info"
        );

        if info.virtual_size < min_size_bytes {
            tracing::info!(
                target = %target.display(),
                from = info.virtual_size,
                to = min_size_bytes,
                "Growing derived volume"
            );
            let size = min_size_bytes.to_string();
            run_tool(
                &self.binary,
                [
                    OsStr::new("resize"),
                    OsStr::new("-f"),
                    OsStr::new("qcow2"),
                    target.as_os_str(),
                    OsStr::new(&size),
                ],
            )
            .await?
            .into_result()?;
        }

        Ok(())
    }
}

fn parse_info(stdout: &str) -> Result<ImageInfo, serde_json::Error> {
    serde_json::from_str(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_info() {
        let json = r#"{
            "virtual-size": 2361393152,
            "filename": "/var/lib/vmforge/base.qcow2",
            "cluster-size": 65536,
            "format": "qcow2",
            "actual-size": 640876544,
            "dirty-flag": false
        }"#;
        let info = parse_info(json).unwrap();
        assert_eq!(info.virtual_size, 2361393152);
        assert_eq!(info.format, "qcow2");
    }

    #[test]
    fn test_parse_info_rejects_garbage() {
        assert!(parse_info("qemu-img: Could not open").is_err());
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let tool = QemuImg::with_binary("/nonexistent/qemu-img");
        let dir = tempfile::tempdir().unwrap();
        let err = tool
            .clone_disk(&dir.path().join("base"), &dir.path().join("out"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }
}
