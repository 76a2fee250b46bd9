//! Newer-release announcement.

use anyhow::Result;

use super::Updater;
use crate::engine::version::major_minor;
use crate::engine::{Release, Transport};
use crate::errors::UpdateError;

/// Major version this updater manages.
const SUPPORTED_MAJOR: u64 = 5;

impl<T: Transport> Updater<T> {
    /// Reports whether a newer stable release exists and what it changes.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::NetworkFailure`] when the latest release cannot
    /// be fetched.
    pub async fn announce(&self) -> Result<()> {
        let release = self.latest_release().await?;
        let current = self.paths.installed_version();

        if let Some((major, _)) = major_minor(&current.to_string())
            && major != SUPPORTED_MAJOR
        {
            self.reporter.blank();
            self.reporter.report(&format!(
                "This updater does not support Lich {current}. Seek assistance."
            ));
            return Ok(());
        }

        if current < release.version() {
            self.reporter.blank();
            self.reporter.report("*** NEW VERSION AVAILABLE ***");
            self.reporter.blank();
            self.reporter.report(&format!(
                "Lich5 version {} is available (installed: {current}).",
                release.version_label()
            ));
            let summary = release.change_summary();
            if !summary.is_empty() {
                self.reporter.blank();
                self.reporter.report(&summary);
            }
            self.reporter.blank();
            self.reporter
                .report("If you are interested in updating, run 'lich5-update --update' now.");
            self.reporter.blank();
        } else {
            self.report_current(&current.to_string());
        }
        Ok(())
    }

    /// The newest stable release, or a reported network failure.
    pub(super) async fn latest_release(&self) -> Result<Release> {
        let url = self.config.remote.latest_release_url();
        match self.metadata.fetch::<Release>(&url).await {
            Some(release) => Ok(release),
            None => {
                self.reporter
                    .report("Could not determine the latest Lich5 release. Try again later.");
                Err(UpdateError::network(format!("latest release unavailable from {url}")).into())
            }
        }
    }

    pub(super) fn report_current(&self, label: &str) {
        self.reporter.blank();
        self.reporter
            .report(&format!("Lich version {label} is good.  Enjoy!"));
        self.reporter.blank();
    }
}
