//! Seed rendering and packaging.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use vmforge_shared::constants::seed;
use vmforge_shared::{SeedError, VmforgeResult};

use super::render_documents;
use crate::credentials::{Secret, hash_secret};
use crate::hypervisor::SeedPackager;

/// Builds seed images.
///
/// Documents are rendered into a fresh [`tempfile::TempDir`] under
/// `scratch_root`, removed when `build_seed` returns on any path. Packaged
/// images land in `output_dir`.
#[derive(Clone)]
pub struct SeedBuilder {
    packager: Arc<dyn SeedPackager>,
    scratch_root: PathBuf,
    output_dir: PathBuf,
}

impl SeedBuilder {
    pub fn new(packager: Arc<dyn SeedPackager>, scratch_root: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            packager,
            scratch_root,
            output_dir,
        }
    }

    /// Render and package the seed for one guest.
    ///
    /// With `password`, only its hash is written into the documents.
    pub async fn build_seed(
        &self,
        hostname: &str,
        username: &str,
        password: Option<&Secret>,
    ) -> VmforgeResult<PathBuf> {
        tokio::fs::create_dir_all(&self.scratch_root)
            .await
            .map_err(|e| SeedError::ScratchDirFailed {
                path: self.scratch_root.display().to_string(),
                error: e.to_string(),
            })?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("seed-{}-", hostname))
            .tempdir_in(&self.scratch_root)
            .map_err(|e| SeedError::ScratchDirFailed {
                path: self.scratch_root.display().to_string(),
                error: e.to_string(),
            })?;

        let password_hash = match password {
            Some(secret) if !secret.is_empty() => Some(hash_secret(secret)?),
            _ => None,
        };
        let rendered = render_documents(hostname, username, password_hash.as_deref())?;

        let meta_path = write_document(scratch.path(), seed::META_DATA, &rendered.meta_data).await?;
        let user_path = write_document(scratch.path(), seed::USER_DATA, &rendered.user_data).await?;

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| SeedError::PackagingFailed {
                output: self.output_dir.display().to_string(),
                tool_output: e.to_string(),
            })?;
        let output = self.output_dir.join(format!("{}-seed.iso", hostname));
        match tokio::fs::remove_file(&output).await {
            Ok(()) => {
                tracing::debug!(output = %output.display(), "Replaced stale staged seed image");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    output = %output.display(),
                    error = %e,
                    "Failed to remove stale staged seed image"
                );
            }
        }

        self.packager
            .package(&[meta_path, user_path], &output)
            .await
            .map_err(|e| SeedError::PackagingFailed {
                output: output.display().to_string(),
                tool_output: e.output(),
            })?;

        tracing::debug!(
            vm_name = %hostname,
            output = %output.display(),
            scratch = %scratch.path().display(),
            "Seed image packaged"
        );

        Ok(output)
    }
}

async fn write_document(dir: &Path, name: &str, contents: &str) -> VmforgeResult<PathBuf> {
    let path = dir.join(name);
    tokio::fs::write(&path, contents)
        .await
        .map_err(|e| SeedError::DocumentWriteFailed {
            document: name.to_string(),
            error: e.to_string(),
        })?;
    Ok(path)
}

impl std::fmt::Debug for SeedBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedBuilder")
            .field("scratch_root", &self.scratch_root)
            .field("output_dir", &self.output_dir)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::generate_secret;
    use crate::util::process::ToolError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Copies the user-data document to the output path.
    #[derive(Default)]
    struct CopyPackager {
        seen: Mutex<Vec<Vec<PathBuf>>>,
    }

    #[async_trait]
    impl SeedPackager for CopyPackager {
        async fn package(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ToolError> {
            self.seen.lock().unwrap().push(inputs.to_vec());
            std::fs::copy(&inputs[1], output).unwrap();
            Ok(())
        }
    }

    struct FailingPackager;

    #[async_trait]
    impl SeedPackager for FailingPackager {
        async fn package(&self, _inputs: &[PathBuf], _output: &Path) -> Result<(), ToolError> {
            Err(ToolError::Failed {
                tool: "genisoimage".into(),
                status: "1".into(),
                output: "genisoimage: No space left on device".into(),
            })
        }
    }

    fn scratch_entries(root: &Path) -> usize {
        std::fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_build_seed_hashes_secret_and_cleans_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let packager = Arc::new(CopyPackager::default());
        let builder = SeedBuilder::new(
            packager.clone(),
            dir.path().join("tmp"),
            dir.path().join("seeds"),
        );
        let secret = generate_secret(16);

        let output = builder
            .build_seed("vm-001", "ubuntu", Some(&secret))
            .await
            .unwrap();

        assert_eq!(output, dir.path().join("seeds/vm-001-seed.iso"));
        let packaged = std::fs::read_to_string(&output).unwrap();
        assert!(packaged.contains("passwd: $6$") || packaged.contains("passwd: '$6$"));
        assert!(!packaged.contains(secret.expose()));

        let inputs = &packaged_inputs(&packager)[0];
        assert!(inputs[0].ends_with("meta-data"));
        assert!(inputs[1].ends_with("user-data"));
        assert_eq!(scratch_entries(&dir.path().join("tmp")), 0);
    }

    #[tokio::test]
    async fn test_build_seed_replaces_stale_image() {
        let dir = tempfile::tempdir().unwrap();
        let seeds = dir.path().join("seeds");
        std::fs::create_dir_all(&seeds).unwrap();
        std::fs::write(seeds.join("vm-001-seed.iso"), "stale").unwrap();
        let builder = SeedBuilder::new(
            Arc::new(CopyPackager::default()),
            dir.path().join("tmp"),
            seeds.clone(),
        );

        let output = builder.build_seed("vm-001", "ubuntu", None).await.unwrap();

        let packaged = std::fs::read_to_string(&output).unwrap();
        assert_ne!(packaged, "stale");
        assert!(packaged.contains("ubuntu"));
    }

    #[tokio::test]
    async fn test_unremovable_stale_image_fails_packaging() {
        let dir = tempfile::tempdir().unwrap();
        let seeds = dir.path().join("seeds");
        std::fs::create_dir_all(seeds.join("vm-001-seed.iso")).unwrap();
        let builder = SeedBuilder::new(
            Arc::new(FailingPackager),
            dir.path().join("tmp"),
            seeds.clone(),
        );

        let err = builder.build_seed("vm-001", "ubuntu", None).await.unwrap_err();
        assert_eq!(err.code_name(), "SEED_PACKAGING_FAILED");
        assert!(seeds.join("vm-001-seed.iso").is_dir());
        assert_eq!(scratch_entries(&dir.path().join("tmp")), 0);
    }

    fn packaged_inputs(packager: &CopyPackager) -> Vec<Vec<PathBuf>> {
        packager.seen.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_build_seed_hash_differs_per_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let builder = SeedBuilder::new(
            Arc::new(CopyPackager::default()),
            dir.path().join("tmp"),
            dir.path().join("seeds"),
        );
        let secret = Secret::new("same-secret-every-time");

        let first = builder.build_seed("vm-001", "ubuntu", Some(&secret)).await.unwrap();
        let first = std::fs::read_to_string(first).unwrap();
        let second = builder.build_seed("vm-001", "ubuntu", Some(&secret)).await.unwrap();
        let second = std::fs::read_to_string(second).unwrap();

        assert_ne!(first, second);
        let strip = |doc: &str| -> String {
            doc.lines()
                .filter(|l| !l.trim_start().starts_with("passwd:"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        assert_eq!(strip(&first), strip(&second));
    }

    #[tokio::test]
    async fn test_packaging_failure_carries_tool_output_and_cleans_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let builder = SeedBuilder::new(
            Arc::new(FailingPackager),
            dir.path().join("tmp"),
            dir.path().join("seeds"),
        );

        let err = builder.build_seed("vm-001", "ubuntu", None).await.unwrap_err();
        assert_eq!(err.code_name(), "SEED_PACKAGING_FAILED");
        assert!(err.details().contains("No space left on device"));
        assert_eq!(scratch_entries(&dir.path().join("tmp")), 0);
    }
}
