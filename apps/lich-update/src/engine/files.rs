//! Single-file updates and the core script/data refresh.
//!
//! Each managed file type has a home directory, an extension allowlist and a
//! canonical remote:
//!
//! | Kind | Extensions | Directory | Remote |
//! |------|------------|-----------|--------|
//! | script | `.lic` | `scripts/` | scripts repository (DR repository for `dependency.lic`) |
//! | library | `.rb` | `lib/` | Lich repository at the channel's reference |
//! | data | `.xml`, `.ui` | `data/` | scripts repository |

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, warn};

use super::paths::InstallPaths;
use super::transport::Transport;
use crate::config::{CoreConfig, RemoteConfig};
use crate::report::Reporter;

/// A type of individually updatable file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// A `.lic` script.
    Script,
    /// A `.rb` library file.
    Library,
    /// A `.xml` or `.ui` data file.
    Data,
}

impl FileKind {
    /// Maps `script`, `library` or `data` (any case).
    #[must_use]
    pub fn parse(kind: &str) -> Option<Self> {
        match kind.to_ascii_lowercase().as_str() {
            "script" => Some(Self::Script),
            "library" => Some(Self::Library),
            "data" => Some(Self::Data),
            _ => None,
        }
    }

    /// Extensions accepted for this kind, including the dot.
    #[must_use]
    pub const fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Script => &[".lic"],
            Self::Library => &[".rb"],
            Self::Data => &[".xml", ".ui"],
        }
    }

    /// Whether `name` carries an allowed extension.
    #[must_use]
    pub fn accepts(self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        self.extensions()
            .iter()
            .any(|ext| lower.len() > ext.len() && lower.ends_with(ext))
    }

    /// Installed directory for this kind.
    #[must_use]
    pub fn directory(self, paths: &InstallPaths) -> &Path {
        match self {
            Self::Script => &paths.scripts,
            Self::Library => &paths.lib,
            Self::Data => &paths.data,
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Script => "script",
            Self::Library => "library",
            Self::Data => "data",
        })
    }
}

/// Game variant, which decides the extra core scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Game {
    /// GemStone IV.
    GemStone,
    /// DragonRealms.
    DragonRealms,
}

impl Game {
    /// Recognizes game codes such as `GS3`, `GSX`, `DR`, `DRF`.
    #[must_use]
    pub fn parse(code: &str) -> Option<Self> {
        let upper = code.trim().to_ascii_uppercase();
        if upper.starts_with("GS") {
            Some(Self::GemStone)
        } else if upper.starts_with("DR") {
            Some(Self::DragonRealms)
        } else {
            None
        }
    }

    /// Key of this game's list in the core script table.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::GemStone => "gs",
            Self::DragonRealms => "dr",
        }
    }
}

/// Result of one single-file update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Downloaded and installed.
    Updated,
    /// Rejected before any network call: wrong extension.
    BadExtension,
    /// Rejected before any network call: not a plain file name.
    BadName,
    /// The remote did not deliver the file; the installed copy is unchanged.
    Unavailable,
}

/// Counts from a core refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Files refreshed.
    pub updated: usize,
    /// Files that could not be refreshed.
    pub failed: usize,
}

/// Downloads individual files into the installation.
pub struct FileUpdater<'a, T> {
    transport: &'a T,
    remote: &'a RemoteConfig,
    core: &'a CoreConfig,
    paths: &'a InstallPaths,
    reporter: &'a dyn Reporter,
}

impl<'a, T: Transport> FileUpdater<'a, T> {
    /// Creates an updater.
    pub fn new(
        transport: &'a T,
        remote: &'a RemoteConfig,
        core: &'a CoreConfig,
        paths: &'a InstallPaths,
        reporter: &'a dyn Reporter,
    ) -> Self {
        Self {
            transport,
            remote,
            core,
            paths,
            reporter,
        }
    }

    /// Remote URL of a file. `library_ref` selects the library reference.
    #[must_use]
    pub fn source_url(&self, kind: FileKind, name: &str, library_ref: &str) -> String {
        let base = match kind {
            FileKind::Script
                if self
                    .core
                    .dr_hosted_scripts
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(name)) =>
            {
                self.remote.dr_scripts_url.clone()
            }
            FileKind::Script | FileKind::Data => self.remote.scripts_url.clone(),
            FileKind::Library => self.remote.library_url(library_ref),
        };
        format!("{}/{name}", base.trim_end_matches('/'))
    }

    /// Updates one file and reports the outcome.
    ///
    /// A failed download leaves any installed copy untouched and no partial
    /// file behind.
    pub async fn update_file(&self, kind: FileKind, name: &str, library_ref: &str) -> FileOutcome {
        if !kind.accepts(name) {
            self.reporter.blank();
            self.reporter
                .report(&format!("The requested file {name} has an incorrect extension."));
            self.reporter
                .report("Valid extensions are '.lic' for scripts, '.rb' for library files,");
            self.reporter
                .report("and '.xml' or '.ui' for data files. Please correct and try again.");
            return FileOutcome::BadExtension;
        }
        if !is_plain_file_name(name) {
            self.reporter.blank();
            self.reporter.report(&format!(
                "The requested file {name} must be a plain file name without directories."
            ));
            return FileOutcome::BadName;
        }

        let url = self.source_url(kind, name, library_ref);
        let target = kind.directory(self.paths).join(name);
        debug!(%kind, %url, target = %target.display(), "updating file");

        match self.transport.download(&url, &target).await {
            Ok(()) => {
                self.reporter.blank();
                self.reporter.report(&format!("{name} has been updated."));
                FileOutcome::Updated
            }
            Err(e) => {
                warn!(%url, error = %e, "file update failed");
                self.reporter.blank();
                self.reporter.report(&format!("Error updating {name}: {e}"));
                self.reporter
                    .report(&format!("The filename {name} is not available via lich5-update."));
                self.reporter.report(&format!(
                    "Check the spelling of your requested file, or use ';jinx' to download {name} from another repository."
                ));
                FileOutcome::Unavailable
            }
        }
    }

    /// Refreshes preserved data files and the core scripts for `game`.
    ///
    /// An unrecognized game is reported and nothing is refreshed. Individual
    /// download failures are reported and counted, not fatal.
    ///
    /// # Errors
    ///
    /// Returns an error only if a preserved data file cannot be copied aside.
    pub async fn sync_core(&self, game: Option<&str>, library_ref: &str) -> Result<SyncSummary> {
        let Some(variant) = game.and_then(Game::parse) else {
            self.reporter.report(&format!(
                "invalid game type '{}', unsure what scripts to update; skipping core script refresh",
                game.unwrap_or_default()
            ));
            return Ok(SyncSummary::default());
        };

        let mut summary = SyncSummary::default();
        for data_file in &self.core.preserved_data {
            if let Some(aside) = self.preserve_data_file(data_file)? {
                self.reporter.report(&format!(
                    "The prior version of {data_file} was renamed to {}.",
                    aside.display()
                ));
            }
            summary.record(self.update_file(FileKind::Data, data_file, library_ref).await);
        }

        for script in self.core.scripts_for(variant.key()) {
            summary.record(self.update_file(FileKind::Script, script, library_ref).await);
        }
        debug!(?summary, "core refresh finished");
        Ok(summary)
    }

    /// Copies `data/<stem>.<ext>` to `data/<stem>-<unix time>.<ext>`.
    fn preserve_data_file(&self, name: &str) -> Result<Option<PathBuf>> {
        let current = self.paths.data.join(name);
        if !current.is_file() {
            return Ok(None);
        }
        let aside = self.paths.data.join(timestamped_name(name, Utc::now().timestamp()));
        std::fs::copy(&current, &aside).with_context(|| {
            format!("Failed to copy {} to {}", current.display(), aside.display())
        })?;
        Ok(Some(aside))
    }
}

impl SyncSummary {
    fn record(&mut self, outcome: FileOutcome) {
        if outcome == FileOutcome::Updated {
            self.updated += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// `effect-list.xml` at `1700000000` becomes `effect-list-1700000000.xml`.
fn timestamped_name(name: &str, unix: i64) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{unix}.{ext}"),
        _ => format!("{name}-{unix}"),
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.starts_with('.')
}
