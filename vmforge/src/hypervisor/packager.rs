//! Seed image packaging through `genisoimage`.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use vmforge_shared::constants::seed;

use super::SeedPackager;
use crate::util::process::{ToolError, run_tool};

/// Builds an ISO9660 image labelled `cidata` from the seed documents.
#[derive(Debug, Clone)]
pub struct GenIsoImage {
    binary: PathBuf,
}

impl Default for GenIsoImage {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("genisoimage"),
        }
    }
}

impl GenIsoImage {
    /// Use a compatible tool (e.g. `mkisofs`) at `binary`.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

fn package_args(inputs: &[PathBuf], output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-output".into(),
        output.as_os_str().to_owned(),
        "-volid".into(),
        seed::VOLUME_ID.into(),
        "-joliet".into(),
        "-rock".into(),
        "-quiet".into(),
    ];
    args.extend(inputs.iter().map(|p| p.as_os_str().to_owned()));
    args
}

#[async_trait]
impl SeedPackager for GenIsoImage {
    async fn package(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ToolError> {
        tracing::debug!(
            output = %output.display(),
            inputs = inputs.len(),
            "Packaging seed image"
        );
        run_tool(&self.binary, package_args(inputs, output))
            .await?
            .into_result()
            .map(|_| ())
    }
}
