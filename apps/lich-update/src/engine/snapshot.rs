//! Snapshots of the installed tree and restoration of the newest one.
//!
//! A snapshot holds the executable, the full library tree and whichever
//! allowlisted core scripts exist:
//!
//! ```text
//! backup/L5-snapshot-2026-10-16-12-00-00/
//!   lich.rbw
//!   lib/...
//!   scripts/alias.lic
//! ```
//!
//! Snapshots are assembled under a hidden `.partial` name and renamed into
//! place once complete, so listing never sees a half-written one. Names sort
//! chronologically.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info};

use super::paths::{InstallPaths, InstalledState, copy_dir, overwrite_file, read_version_label, remove_top_level_files};
use crate::config::{CoreConfig, LayoutConfig};
use crate::errors::UpdateError;

/// Creates and restores snapshots under the backup root.
pub struct SnapshotManager<'a> {
    paths: &'a InstallPaths,
    layout: &'a LayoutConfig,
    core: &'a CoreConfig,
}

impl<'a> SnapshotManager<'a> {
    /// Creates a manager for an installation.
    #[must_use]
    pub fn new(paths: &'a InstallPaths, layout: &'a LayoutConfig, core: &'a CoreConfig) -> Self {
        Self {
            paths,
            layout,
            core,
        }
    }

    /// Copies the executable, library tree and core scripts into a new snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if any copy fails; the incomplete snapshot is removed.
    pub fn snapshot(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.paths.backup).with_context(|| {
            format!("Failed to create directory: {}", self.paths.backup.display())
        })?;

        let target = self.next_snapshot_path();
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staging = self.paths.backup.join(format!(".{file_name}.partial"));

        if let Err(e) = self.populate(&staging) {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }

        std::fs::rename(&staging, &target).with_context(|| {
            format!("Failed to finalize snapshot {}", target.display())
        })?;
        info!(snapshot = %target.display(), "snapshot created");
        Ok(target)
    }

    fn populate(&self, staging: &Path) -> Result<()> {
        std::fs::create_dir_all(staging)
            .with_context(|| format!("Failed to create directory: {}", staging.display()))?;

        std::fs::copy(&self.paths.executable, staging.join(&self.layout.executable))
            .with_context(|| format!("Failed to copy {}", self.paths.executable.display()))?;

        copy_dir(&self.paths.lib, &staging.join(&self.layout.lib_dir))?;

        let scripts = staging.join(&self.layout.scripts_dir);
        std::fs::create_dir_all(&scripts)
            .with_context(|| format!("Failed to create directory: {}", scripts.display()))?;
        for name in &self.core.snapshot_scripts {
            let source = self.paths.scripts.join(name);
            if !source.is_file() {
                debug!(script = %name, "core script absent; not snapshotted");
                continue;
            }
            std::fs::copy(&source, scripts.join(name))
                .with_context(|| format!("Failed to copy {}", source.display()))?;
        }
        Ok(())
    }

    /// A fresh, chronologically sortable name under the backup root.
    fn next_snapshot_path(&self) -> PathBuf {
        let base = format!(
            "{}-{}",
            self.layout.snapshot_prefix,
            Utc::now().format("%Y-%m-%d-%H-%M-%S")
        );
        let mut candidate = self.paths.backup.join(&base);
        let mut counter = 1u32;
        while candidate.exists() {
            candidate = self.paths.backup.join(format!("{base}-{counter:02}"));
            counter += 1;
        }
        candidate
    }

    /// Completed snapshots, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backup root exists but cannot be read.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        if !self.paths.backup.is_dir() {
            return Ok(Vec::new());
        }
        let mut snapshots: Vec<PathBuf> = std::fs::read_dir(&self.paths.backup)
            .with_context(|| format!("Failed to read directory: {}", self.paths.backup.display()))?
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with(&self.layout.snapshot_prefix)
            })
            .map(|entry| entry.path())
            .collect();
        snapshots.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
        Ok(snapshots)
    }

    /// Restores the newest snapshot over the installation.
    ///
    /// Destructive: the current library files and core scripts are replaced
    /// without taking another snapshot. An existing installed-state marker is
    /// rewritten with the restored version and channel `revert`. Returns the
    /// restored `LICH_VERSION`, or an empty string when it cannot be read.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::NoSnapshotAvailable`] before touching anything
    /// when the backup root holds no snapshot, or an I/O error mid-restore.
    pub fn restore_latest(&self) -> Result<String> {
        let Some(snapshot) = self.list()?.into_iter().next() else {
            return Err(UpdateError::no_snapshot(&self.paths.backup).into());
        };
        info!(snapshot = %snapshot.display(), "restoring snapshot");

        remove_top_level_files(&self.paths.lib)?;
        copy_dir(&snapshot.join(&self.layout.lib_dir), &self.paths.lib)?;

        for name in &self.core.snapshot_scripts {
            let installed = self.paths.scripts.join(name);
            if installed.is_file() {
                std::fs::remove_file(&installed)
                    .with_context(|| format!("Failed to remove {}", installed.display()))?;
            }
        }
        let saved_scripts = snapshot.join(&self.layout.scripts_dir);
        if saved_scripts.is_dir() {
            copy_dir(&saved_scripts, &self.paths.scripts)?;
        }

        overwrite_file(&snapshot.join(&self.layout.executable), &self.paths.executable)?;

        let label = read_version_label(&self.paths.version_file).unwrap_or_default();
        if self.paths.state_file.is_file() {
            let reference = snapshot
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            InstalledState::now(&label, &reference, "revert").save(&self.paths.state_file)?;
        }
        Ok(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use std::collections::BTreeMap;
    use walkdir::WalkDir;

    struct Install {
        temp: assert_fs::TempDir,
        paths: InstallPaths,
        layout: LayoutConfig,
        core: CoreConfig,
    }

    impl Install {
        fn new() -> Self {
            let temp = assert_fs::TempDir::new().unwrap();
            temp.child("lich.rbw").write_str("# v5.14.3 entry\n").unwrap();
            temp.child("lib/version.rb").write_str("LICH_VERSION = \"5.14.3\"\n").unwrap();
            temp.child("lib/common/util.rb").write_str("module Util; end\n").unwrap();
            temp.child("scripts/alias.lic").write_str("alias v1").unwrap();
            temp.child("scripts/my-own.lic").write_str("user script").unwrap();
            let layout = LayoutConfig::default();
            let paths = InstallPaths::with_root(temp.path().to_path_buf(), &layout);
            Self {
                temp,
                paths,
                layout,
                core: CoreConfig::default(),
            }
        }

        fn manager(&self) -> SnapshotManager<'_> {
            SnapshotManager::new(&self.paths, &self.layout, &self.core)
        }

        /// Relative path -> bytes for everything outside backup/.
        fn tree(&self) -> BTreeMap<String, Vec<u8>> {
            WalkDir::new(self.temp.path())
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .filter(|e| !e.path().starts_with(&self.paths.backup))
                .map(|e| {
                    let rel = e.path().strip_prefix(self.temp.path()).unwrap();
                    (rel.to_string_lossy().into_owned(), std::fs::read(e.path()).unwrap())
                })
                .collect()
        }
    }

    #[test]
    fn snapshot_copies_executable_library_and_present_core_scripts() {
        let install = Install::new();
        let snapshot = install.manager().snapshot().unwrap();

        let name = snapshot.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("L5-snapshot-"));
        assert!(snapshot.join("lich.rbw").is_file());
        assert!(snapshot.join("lib/common/util.rb").is_file());
        assert!(snapshot.join("scripts/alias.lic").is_file());
        assert!(!snapshot.join("scripts/my-own.lic").exists());
        assert!(!snapshot.join("scripts/go2.lic").exists());
    }

    #[test]
    fn snapshot_then_restore_is_byte_identical() {
        let install = Install::new();
        let before = install.tree();

        install.manager().snapshot().unwrap();
        let label = install.manager().restore_latest().unwrap();

        assert_eq!(label, "5.14.3");
        assert_eq!(install.tree(), before);
    }

    #[test]
    fn restore_undoes_library_and_script_changes() {
        let install = Install::new();
        install.manager().snapshot().unwrap();

        install.temp.child("lib/version.rb").write_str("LICH_VERSION = \"5.15.0\"\n").unwrap();
        install.temp.child("lib/new_in_515.rb").write_str("new").unwrap();
        install.temp.child("scripts/alias.lic").write_str("alias v2").unwrap();
        install.temp.child("scripts/go2.lic").write_str("go2 v2").unwrap();
        install.temp.child("lich.rbw").write_str("# v5.15.0 entry\n").unwrap();

        let label = install.manager().restore_latest().unwrap();

        assert_eq!(label, "5.14.3");
        install.temp.child("lib/new_in_515.rb").assert(predicates::path::missing());
        install.temp.child("scripts/alias.lic").assert("alias v1");
        install.temp.child("scripts/go2.lic").assert(predicates::path::missing());
        install.temp.child("scripts/my-own.lic").assert("user script");
        install.temp.child("lich.rbw").assert("# v5.14.3 entry\n");
    }

    #[test]
    fn restore_rewrites_existing_marker_with_restored_version() {
        let install = Install::new();
        let snapshot = install.manager().snapshot().unwrap();
        install.temp.child("lib/version.rb").write_str("LICH_VERSION = \"5.15.0\"\n").unwrap();
        InstalledState::now("5.15.0", "v5.15.0", "stable")
            .save(&install.paths.state_file)
            .unwrap();

        install.manager().restore_latest().unwrap();

        let state = InstalledState::load(&install.paths.state_file).unwrap().unwrap();
        assert_eq!(state.version, "5.14.3");
        assert_eq!(state.channel, "revert");
        assert_eq!(
            state.reference,
            snapshot.file_name().unwrap().to_string_lossy()
        );
    }

    #[test]
    fn restore_without_snapshot_fails_and_changes_nothing() {
        let install = Install::new();
        let before = install.tree();

        let err = install.manager().restore_latest().unwrap_err();

        assert!(matches!(
            err.downcast_ref::<UpdateError>(),
            Some(UpdateError::NoSnapshotAvailable { .. })
        ));
        assert_eq!(install.tree(), before);
        assert!(!install.paths.backup.exists());
    }

    #[test]
    fn list_is_newest_first_and_ignores_foreign_entries() {
        let install = Install::new();
        install.temp.child("backup/L5-snapshot-2024-01-01-00-00-00/lich.rbw").touch().unwrap();
        install.temp.child("backup/L5-snapshot-2025-06-01-00-00-00/lich.rbw").touch().unwrap();
        install.temp.child("backup/.L5-snapshot-2026-01-01-00-00-00.partial/lich.rbw").touch().unwrap();
        install.temp.child("backup/notes/readme.txt").touch().unwrap();

        let names: Vec<String> = install
            .manager()
            .list()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            names,
            vec!["L5-snapshot-2025-06-01-00-00-00", "L5-snapshot-2024-01-01-00-00-00"]
        );
    }

    #[test]
    fn same_second_snapshots_get_distinct_names() {
        let install = Install::new();
        let first = install.manager().snapshot().unwrap();
        let second = install.manager().snapshot().unwrap();

        assert_ne!(first, second);
        let listed = install.manager().list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0], second.max(first));
    }

    #[test]
    fn missing_executable_aborts_without_leaving_a_snapshot() {
        let install = Install::new();
        std::fs::remove_file(&install.paths.executable).unwrap();

        assert!(install.manager().snapshot().is_err());
        assert!(install.manager().list().unwrap().is_empty());
        let leftovers = std::fs::read_dir(&install.paths.backup).unwrap().count();
        assert_eq!(leftovers, 0);
    }
}
