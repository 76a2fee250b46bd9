//! Installation layout and installed-state bookkeeping.
//!
//! ## Directory Structure
//!
//! ```text
//! <root>/                        # --home, LICH_HOME, cwd or ~/lich5
//!   lich.rbw                     # main executable
//!   lib/                         # library tree
//!     version.rb                 # LICH_VERSION = "5.14.3"
//!   scripts/                     # core and user scripts
//!   data/
//!     lich-update.json           # installed-state marker
//!     lich-update.toml           # optional updater configuration
//!   backup/
//!     L5-snapshot-2026-10-16-12-00-00/
//!   temp/                        # downloads, extraction, lock file
//! ```

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use super::version::VersionKey;
use crate::config::{CONFIG_FILE_NAME, LayoutConfig};

/// Environment variable naming the installation root.
pub const LICH_HOME_ENV: &str = "LICH_HOME";

/// Lock file name inside the temp directory.
const LOCK_FILE: &str = "lich-update.lock";

static LICH_VERSION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"LICH_VERSION\s*=\s*["']([^"']+)["']"#).expect("version line is a valid regex")
});

/// Absolute paths of everything the updater manages.
#[derive(Debug, Clone)]
pub struct InstallPaths {
    /// Installation root.
    pub root: PathBuf,
    /// Main executable.
    pub executable: PathBuf,
    /// Library tree.
    pub lib: PathBuf,
    /// Scripts directory.
    pub scripts: PathBuf,
    /// Data directory.
    pub data: PathBuf,
    /// Snapshot root.
    pub backup: PathBuf,
    /// Scratch directory.
    pub temp: PathBuf,
    /// Installed version file inside the library tree.
    pub version_file: PathBuf,
    /// Installed-state marker.
    pub state_file: PathBuf,
}

impl InstallPaths {
    /// Lays out paths under `root`.
    #[must_use]
    pub fn with_root(root: PathBuf, layout: &LayoutConfig) -> Self {
        let lib = root.join(&layout.lib_dir);
        let data = root.join(&layout.data_dir);
        Self {
            executable: root.join(&layout.executable),
            version_file: lib.join(&layout.version_file),
            state_file: data.join(&layout.state_file),
            scripts: root.join(&layout.scripts_dir),
            backup: root.join(&layout.backup_dir),
            temp: root.join(&layout.temp_dir),
            lib,
            data,
            root,
        }
    }

    /// Determines the installation root.
    ///
    /// Order: `explicit`, then `LICH_HOME`, then the current directory when it
    /// holds the executable, then `~/lich5`.
    ///
    /// # Errors
    ///
    /// Returns an error if no candidate applies and the home directory is unknown.
    pub fn resolve_root(explicit: Option<PathBuf>, layout: &LayoutConfig) -> Result<PathBuf> {
        if let Some(root) = explicit {
            return Ok(root);
        }
        if let Some(home) = std::env::var_os(LICH_HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(home));
        }
        if let Ok(cwd) = std::env::current_dir()
            && cwd.join(&layout.executable).is_file()
        {
            return Ok(cwd);
        }
        Ok(dirs::home_dir()
            .context("Cannot determine home directory. Set LICH_HOME or pass --home.")?
            .join("lich5"))
    }

    /// Default location of the updater configuration file.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.data.join(CONFIG_FILE_NAME)
    }

    /// Advisory lock file serializing mutating operations.
    #[must_use]
    pub fn lock_file(&self) -> PathBuf {
        self.temp.join(LOCK_FILE)
    }

    /// Version of the running installation.
    ///
    /// Read from the library's version file, then the installed-state marker;
    /// the lowest key when neither is available.
    #[must_use]
    pub fn installed_version(&self) -> VersionKey {
        if let Some(label) = read_version_label(&self.version_file) {
            return VersionKey::parse(&label);
        }
        InstalledState::load(&self.state_file)
            .ok()
            .flatten()
            .map_or_else(VersionKey::lowest, |state| VersionKey::parse(&state.version))
    }
}

/// The persisted "last updated to" marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstalledState {
    /// Version label that was applied.
    pub version: String,
    /// Tag or branch it came from.
    pub reference: String,
    /// Channel that was requested.
    pub channel: String,
    /// When the apply finished.
    pub updated_at: DateTime<Utc>,
}

impl InstalledState {
    /// Creates a marker stamped with the current time.
    #[must_use]
    pub fn now(version: &str, reference: &str, channel: &str) -> Self {
        Self {
            version: version.to_string(),
            reference: reference.to_string(),
            channel: channel.to_string(),
            updated_at: Utc::now(),
        }
    }

    /// Reads the marker; `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let state = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(state))
    }

    /// Writes the marker, creating its directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize installed state")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

/// `LICH_VERSION` value from a version file, if the file and line exist.
#[must_use]
pub fn read_version_label(version_file: &Path) -> Option<String> {
    let content = std::fs::read_to_string(version_file).ok()?;
    scan_version_label(&content)
}

/// Scans Ruby source for `LICH_VERSION = "..."`.
#[must_use]
pub fn scan_version_label(content: &str) -> Option<String> {
    LICH_VERSION_LINE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Recursively copies `src` into `dst`, overwriting existing files.
///
/// Returns the number of files copied.
///
/// # Errors
///
/// Returns an error on the first directory or file that cannot be copied.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<u64> {
    std::fs::create_dir_all(dst)
        .with_context(|| format!("Failed to create directory: {}", dst.display()))?;

    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("Unexpected path {}", entry.path().display()))?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create directory: {}", target.display()))?;
        } else {
            std::fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
            copied += 1;
        }
    }
    debug!(src = %src.display(), dst = %dst.display(), copied, "copied tree");
    Ok(copied)
}

/// Removes regular files directly under `dir`; subdirectories are untouched.
///
/// A missing directory is not an error.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed or a file cannot be removed.
pub fn remove_top_level_files(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
    {
        let entry = entry.with_context(|| format!("Failed to read entry in {}", dir.display()))?;
        let file_type = entry
            .file_type()
            .with_context(|| format!("Failed to stat {}", entry.path().display()))?;
        if !file_type.is_dir() {
            std::fs::remove_file(entry.path())
                .with_context(|| format!("Failed to remove {}", entry.path().display()))?;
        }
    }
    Ok(())
}

/// Replaces the bytes of `dest` with those of `src`, keeping `dest` in place.
///
/// # Errors
///
/// Returns an error if either file cannot be accessed.
pub fn overwrite_file(src: &Path, dest: &Path) -> Result<()> {
    let bytes = std::fs::read(src).with_context(|| format!("Failed to read {}", src.display()))?;
    std::fs::write(dest, bytes).with_context(|| format!("Failed to write {}", dest.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    fn paths(root: &Path) -> InstallPaths {
        InstallPaths::with_root(root.to_path_buf(), &LayoutConfig::default())
    }

    #[test]
    fn layout_is_relative_to_root() {
        let p = paths(Path::new("/games/lich5"));
        assert_eq!(p.executable, PathBuf::from("/games/lich5/lich.rbw"));
        assert_eq!(p.version_file, PathBuf::from("/games/lich5/lib/version.rb"));
        assert_eq!(p.state_file, PathBuf::from("/games/lich5/data/lich-update.json"));
        assert_eq!(p.lock_file(), PathBuf::from("/games/lich5/temp/lich-update.lock"));
        assert_eq!(p.config_file(), PathBuf::from("/games/lich5/data/lich-update.toml"));
    }

    #[test]
    fn explicit_root_wins() {
        let root = InstallPaths::resolve_root(Some(PathBuf::from("/x")), &LayoutConfig::default());
        assert_eq!(root.unwrap(), PathBuf::from("/x"));
    }

    #[test]
    #[serial_test::serial]
    fn lich_home_is_used_when_no_root_is_given() {
        let original = std::env::var_os(LICH_HOME_ENV);
        // SAFETY: serialized test; the variable is restored below.
        unsafe {
            std::env::set_var(LICH_HOME_ENV, "/srv/lich5");
        }
        let root = InstallPaths::resolve_root(None, &LayoutConfig::default());
        // SAFETY: restores the value saved above.
        unsafe {
            match original {
                Some(value) => std::env::set_var(LICH_HOME_ENV, value),
                None => std::env::remove_var(LICH_HOME_ENV),
            }
        }
        assert_eq!(root.unwrap(), PathBuf::from("/srv/lich5"));
    }

    #[test]
    fn scans_version_line() {
        let content = "module Lich\n  LICH_VERSION = \"5.14.3\"\n  REQUIRED_RUBY = '2.6'\nend\n";
        assert_eq!(scan_version_label(content).as_deref(), Some("5.14.3"));
        assert_eq!(scan_version_label("LICH_VERSION='5.15.0-beta.1'").as_deref(), Some("5.15.0-beta.1"));
        assert_eq!(scan_version_label("nothing here"), None);
    }

    #[test]
    fn installed_version_prefers_version_file() {
        let temp = assert_fs::TempDir::new().unwrap();
        let p = paths(temp.path());
        temp.child("lib/version.rb").write_str("LICH_VERSION = \"5.14.3\"\n").unwrap();
        InstalledState::now("5.13.0", "v5.13.0", "stable").save(&p.state_file).unwrap();

        assert_eq!(p.installed_version(), VersionKey::parse("5.14.3"));
    }

    #[test]
    fn installed_version_falls_back_to_marker_then_lowest() {
        let temp = assert_fs::TempDir::new().unwrap();
        let p = paths(temp.path());
        assert!(p.installed_version().is_lowest());

        InstalledState::now("5.13.0", "v5.13.0", "stable").save(&p.state_file).unwrap();
        assert_eq!(p.installed_version(), VersionKey::parse("5.13.0"));
    }

    #[test]
    fn installed_state_round_trips() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("data/lich-update.json");
        let state = InstalledState::now("5.15.0-beta.1", "v5.15.0-beta.1", "beta");
        state.save(file.path()).unwrap();

        assert_eq!(InstalledState::load(file.path()).unwrap(), Some(state));
        assert_eq!(InstalledState::load(&temp.path().join("missing.json")).unwrap(), None);
    }

    #[test]
    fn copy_dir_copies_nested_files() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("src/a.rb").write_str("a").unwrap();
        temp.child("src/common/b.rb").write_str("b").unwrap();

        let copied = copy_dir(&temp.path().join("src"), &temp.path().join("dst")).unwrap();

        assert_eq!(copied, 2);
        temp.child("dst/a.rb").assert("a");
        temp.child("dst/common/b.rb").assert("b");
    }

    #[test]
    fn remove_top_level_files_keeps_subdirectories() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("lib/a.rb").write_str("a").unwrap();
        temp.child("lib/common/b.rb").write_str("b").unwrap();

        remove_top_level_files(&temp.path().join("lib")).unwrap();

        temp.child("lib/a.rb").assert(predicates::path::missing());
        temp.child("lib/common/b.rb").assert("b");
        assert!(remove_top_level_files(&temp.path().join("absent")).is_ok());
    }

    #[test]
    fn overwrite_file_replaces_bytes() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("new.rbw").write_str("new").unwrap();
        temp.child("lich.rbw").write_str("old and longer").unwrap();

        overwrite_file(&temp.path().join("new.rbw"), &temp.path().join("lich.rbw")).unwrap();
        temp.child("lich.rbw").assert("new");
    }
}
