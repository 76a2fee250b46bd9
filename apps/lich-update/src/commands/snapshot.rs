//! Snapshot and revert.

use std::path::PathBuf;

use anyhow::Result;

use super::Updater;
use crate::engine::{SnapshotManager, Transport};
use crate::errors::UpdateError;

const NO_SNAPSHOT: &str = "No prior Lich5 version found. Seek assistance.";

impl<T: Transport> Updater<T> {
    fn snapshots(&self) -> SnapshotManager<'_> {
        SnapshotManager::new(&self.paths, &self.config.layout, &self.config.core)
    }

    /// Copies the current core files into a new snapshot.
    ///
    /// # Errors
    ///
    /// Returns the copy error; no partial snapshot is left behind.
    pub fn snapshot(&self) -> Result<PathBuf> {
        self.reporter.blank();
        self.reporter
            .report("Creating a snapshot of current Lich core files ONLY.");
        match self.snapshots().snapshot() {
            Ok(path) => {
                self.reporter.blank();
                self.reporter.report(&format!(
                    "Current Lich ecosystem files (only) backed up to:\n    {}",
                    path.display()
                ));
                Ok(path)
            }
            Err(e) => {
                self.reporter.report(&format!("Snapshot failed: {e:#}"));
                Err(e)
            }
        }
    }

    /// Fails with a reported [`UpdateError::NoSnapshotAvailable`] when the
    /// backup root holds nothing to restore.
    pub(super) fn ensure_snapshot_exists(&self) -> Result<()> {
        if self.snapshots().list()?.is_empty() {
            self.reporter.blank();
            self.reporter
                .report("Reverting Lich5 to previously installed version.");
            self.reporter.report(NO_SNAPSHOT);
            return Err(UpdateError::no_snapshot(&self.paths.backup).into());
        }
        Ok(())
    }

    /// Restores the newest snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::NoSnapshotAvailable`] without touching anything
    /// when there is nothing to restore, or the I/O error that interrupted
    /// the restore.
    pub fn revert(&self) -> Result<()> {
        self.reporter.blank();
        self.reporter
            .report("Reverting Lich5 to previously installed version.");
        match self.snapshots().restore_latest() {
            Ok(label) => {
                let label = if label.is_empty() { "unknown" } else { label.as_str() };
                self.reporter.blank();
                self.reporter
                    .report(&format!("Lich5 has been reverted to Lich5 version {label}"));
                self.reporter
                    .report("You should exit the game, then log back in.  This will start the game");
                self.reporter.report("with your previous version of Lich.  Enjoy!");
                self.reporter.blank();
                Ok(())
            }
            Err(e) => {
                if let Some(UpdateError::NoSnapshotAvailable { .. }) = e.downcast_ref::<UpdateError>()
                {
                    self.reporter.report(NO_SNAPSHOT);
                } else {
                    self.reporter.report(&format!("Revert failed: {e:#}"));
                    self.reporter
                        .report("The installation may be inconsistent. Seek assistance.");
                }
                Err(e)
            }
        }
    }
}
