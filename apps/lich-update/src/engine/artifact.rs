//! Artifact download, extraction and shape validation.
//!
//! Everything happens inside a [`ScratchArea`] under the installation's temp
//! directory. The scratch area is removed when it goes out of scope, so an
//! aborted update (bad checksum, malformed archive, incompatible runtime)
//! leaves nothing behind.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use super::archive::extract_tar_gz;
use super::transport::Transport;
use super::verify::verify_checksum;
use crate::config::LayoutConfig;
use crate::errors::UpdateError;

/// Where to fetch an archive from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSource {
    /// Archive URL.
    pub url: String,
    /// Expected SHA-256, when the release publishes one.
    pub sha256: Option<String>,
}

impl ArtifactSource {
    /// An archive with no published digest.
    #[must_use]
    pub fn unverified(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sha256: None,
        }
    }
}

/// A private directory under the temp root, deleted on drop.
#[derive(Debug)]
pub struct ScratchArea {
    root: PathBuf,
}

impl ScratchArea {
    /// Creates `<temp_dir>/lich-update-<label>-<timestamp>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn create(temp_dir: &Path, label: &str) -> Result<Self> {
        let safe_label: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        let root = temp_dir.join(format!(
            "lich-update-{safe_label}-{}",
            Utc::now().format("%Y%m%d%H%M%S%f")
        ));
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create scratch directory: {}", root.display()))?;
        Ok(Self { root })
    }

    /// The scratch directory itself.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Where the archive is downloaded to.
    #[must_use]
    pub fn archive_path(&self) -> PathBuf {
        self.root.join("artifact.tar.gz")
    }

    /// Where the archive is extracted to.
    #[must_use]
    pub fn extract_dir(&self) -> PathBuf {
        self.root.join("extracted")
    }
}

impl Drop for ScratchArea {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.root)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.root.display(), error = %e, "failed to remove scratch directory");
        }
    }
}

/// Downloads and unpacks archives.
pub struct ArtifactFetcher<'a, T> {
    transport: &'a T,
    layout: &'a LayoutConfig,
}

impl<'a, T: Transport> ArtifactFetcher<'a, T> {
    /// Creates a fetcher over a transport.
    pub fn new(transport: &'a T, layout: &'a LayoutConfig) -> Self {
        Self { transport, layout }
    }

    /// Downloads `source` into `scratch`, verifies it when a digest is known,
    /// extracts it and returns the installation root inside the archive.
    ///
    /// # Errors
    ///
    /// - [`UpdateError::DownloadFailed`] if the archive cannot be fetched
    /// - [`UpdateError::ChecksumMismatch`] if the digest differs
    /// - [`UpdateError::ArchiveUnreadable`] / [`UpdateError::ArchiveEmpty`] from extraction
    pub async fn fetch_and_extract(
        &self,
        source: &ArtifactSource,
        scratch: &ScratchArea,
    ) -> Result<PathBuf> {
        let archive_path = scratch.archive_path();
        info!(url = %source.url, "downloading artifact");
        self.transport
            .download(&source.url, &archive_path)
            .await
            .map_err(|e| UpdateError::download_failed(&source.url, e))?;

        if let Some(expected) = &source.sha256 {
            verify_checksum(&archive_path, expected)?;
            debug!("artifact checksum verified");
        }

        let extract_dir = scratch.extract_dir();
        extract_tar_gz(&archive_path, &extract_dir)?;
        Ok(extract_dir)
    }

    /// Checks that an extracted tree has a library directory and an executable.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::ArtifactStructureInvalid`] naming the first missing path.
    pub fn validate_structure(&self, root: &Path) -> Result<()> {
        validate_structure(root, self.layout)
    }
}

/// Checks that an extracted tree has a library directory and an executable.
///
/// # Errors
///
/// Returns [`UpdateError::ArtifactStructureInvalid`] naming the first missing path.
pub fn validate_structure(root: &Path, layout: &LayoutConfig) -> Result<()> {
    if !root.join(&layout.lib_dir).is_dir() {
        return Err(UpdateError::structure_invalid(format!("{}/", layout.lib_dir)).into());
    }
    if !root.join(&layout.executable).is_file() {
        return Err(UpdateError::structure_invalid(layout.executable.clone()).into());
    }
    Ok(())
}
