//! Applying an extracted artifact to the installation.
//!
//! ## Steps
//!
//! 1. Replace the library tree (staged swap, remove-and-copy fallback)
//! 2. Refresh preserved data files and core scripts
//! 3. Overwrite the executable's bytes
//! 4. Persist the installed-state marker
//!
//! Any failure from step 1 onward is an [`UpdateError::ApplyPartialFailure`];
//! the documented recovery is `--revert`.
//!
//! ## Library Swap
//!
//! The installed subdirectories are copied to `lib.staged-<stamp>` next to the
//! installed tree and the new tree is copied over them, so the staged tree is
//! what removing the top-level files and copying would produce. Then `lib` becomes `lib.previous-<stamp>` and the staged tree
//! becomes `lib`; if the second rename fails the first is undone. When staging
//! or renaming is impossible (cross-device, permissions) the top-level library
//! files are removed and the new tree copied over them instead.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use super::files::FileUpdater;
use super::paths::{InstallPaths, InstalledState, copy_dir, overwrite_file, remove_top_level_files};
use super::transport::Transport;
use crate::config::LayoutConfig;
use crate::errors::UpdateError;
use crate::report::Reporter;

/// What is being applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyTarget {
    /// Version label recorded in the marker.
    pub version: String,
    /// Tag or branch the artifact came from.
    pub reference: String,
    /// Channel that was requested.
    pub channel: String,
}

/// How the library tree was replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibrarySwap {
    /// Staged copy renamed into place.
    Staged,
    /// Old top-level files removed, new tree copied over.
    Copied,
}

/// Mutates the installation from an extracted artifact.
pub struct UpdateApplier<'a, T> {
    paths: &'a InstallPaths,
    layout: &'a LayoutConfig,
    files: FileUpdater<'a, T>,
    reporter: &'a dyn Reporter,
    game: Option<&'a str>,
}

impl<'a, T: Transport> UpdateApplier<'a, T> {
    /// Creates an applier. `files` performs the core refresh for `game`.
    pub fn new(
        paths: &'a InstallPaths,
        layout: &'a LayoutConfig,
        files: FileUpdater<'a, T>,
        reporter: &'a dyn Reporter,
        game: Option<&'a str>,
    ) -> Self {
        Self {
            paths,
            layout,
            files,
            reporter,
            game,
        }
    }

    /// Applies the artifact rooted at `extracted_root`.
    ///
    /// `library_ref` is the reference core library files are fetched from
    /// during the refresh.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::ApplyPartialFailure`] naming the failed step.
    pub async fn apply(
        &self,
        extracted_root: &Path,
        target: &ApplyTarget,
        library_ref: &str,
    ) -> Result<LibrarySwap> {
        let partial = |step, e| UpdateError::apply_partial(&target.version, step, e);

        self.reporter.blank();
        self.reporter.report("Copying updated lich files to their locations.");
        let swap = replace_library(&extracted_root.join(&self.layout.lib_dir), &self.paths.lib)
            .map_err(|e| partial("library replacement", e))?;
        self.reporter.blank();
        self.reporter.report("All Lich lib files have been updated.");

        self.files
            .sync_core(self.game, library_ref)
            .await
            .map_err(|e| partial("core script refresh", e))?;

        overwrite_file(&extracted_root.join(&self.layout.executable), &self.paths.executable)
            .map_err(|e| partial("executable replacement", e))?;

        InstalledState::now(&target.version, &target.reference, &target.channel)
            .save(&self.paths.state_file)
            .map_err(|e| partial("version marker", e))?;

        info!(version = %target.version, ?swap, "update applied");
        Ok(swap)
    }
}

/// Replaces `lib` with `new_lib`.
///
/// # Errors
///
/// Returns an error if neither the staged swap nor the fallback copy succeeds.
pub fn replace_library(new_lib: &Path, lib: &Path) -> Result<LibrarySwap> {
    let stamp = Utc::now().format("%Y%m%d%H%M%S%f").to_string();
    match staged_swap(new_lib, lib, &stamp) {
        Ok(()) => Ok(LibrarySwap::Staged),
        Err(e) => {
            warn!(error = %e, "staged library swap failed; falling back to copy");
            remove_top_level_files(lib)?;
            copy_dir(new_lib, lib)?;
            Ok(LibrarySwap::Copied)
        }
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn staged_swap(new_lib: &Path, lib: &Path, stamp: &str) -> Result<()> {
    let staged = sibling(lib, &format!(".staged-{stamp}"));
    let previous = sibling(lib, &format!(".previous-{stamp}"));

    if let Err(e) = stage(new_lib, lib, &staged) {
        let _ = std::fs::remove_dir_all(&staged);
        return Err(e);
    }

    if !lib.exists() {
        return std::fs::rename(&staged, lib)
            .with_context(|| format!("Failed to move {} into place", staged.display()));
    }

    if let Err(e) = std::fs::rename(lib, &previous) {
        let _ = std::fs::remove_dir_all(&staged);
        return Err(e).with_context(|| format!("Failed to move aside {}", lib.display()));
    }

    if let Err(e) = std::fs::rename(&staged, lib) {
        std::fs::rename(&previous, lib).with_context(|| {
            format!(
                "Failed to restore {} from {}",
                lib.display(),
                previous.display()
            )
        })?;
        let _ = std::fs::remove_dir_all(&staged);
        return Err(e).with_context(|| format!("Failed to move {} into place", staged.display()));
    }

    if let Err(e) = std::fs::remove_dir_all(&previous) {
        warn!(path = %previous.display(), error = %e, "could not remove previous library tree");
    }
    Ok(())
}

/// Copies the old subdirectories, then the new tree on top of them.
///
/// Top-level files of the old tree are dropped; files inside subdirectories
/// survive unless the new tree overwrites them.
fn stage(new_lib: &Path, lib: &Path, staged: &Path) -> Result<()> {
    std::fs::create_dir_all(staged)
        .with_context(|| format!("Failed to create directory: {}", staged.display()))?;
    if lib.is_dir() {
        for entry in std::fs::read_dir(lib)
            .with_context(|| format!("Failed to read directory: {}", lib.display()))?
        {
            let entry = entry.with_context(|| format!("Failed to read entry in {}", lib.display()))?;
            let is_dir = entry
                .file_type()
                .with_context(|| format!("Failed to stat {}", entry.path().display()))?
                .is_dir();
            if is_dir {
                copy_dir(&entry.path(), &staged.join(entry.file_name()))?;
            }
        }
    }
    copy_dir(new_lib, staged)?;
    Ok(())
}
