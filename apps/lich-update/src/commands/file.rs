//! Single-file updates.

use anyhow::Result;

use super::Updater;
use crate::engine::files::FileOutcome;
use crate::engine::{Channel, FileKind, FileUpdater, Transport};
use crate::errors::UpdateError;

impl<T: Transport> Updater<T> {
    /// Updates one script, library or data file from its stable location.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidArguments`] for a rejected name and
    /// [`UpdateError::NetworkFailure`] when the file cannot be downloaded.
    pub async fn update_file(&self, kind: FileKind, name: &str) -> Result<()> {
        self.update_file_from(kind, name, &Channel::Stable).await
    }

    /// Updates one file, taking library files from the beta reference.
    ///
    /// # Errors
    ///
    /// As [`Updater::update_file`], plus beta resolution errors for library files.
    pub async fn update_beta_file(&self, kind: FileKind, name: &str) -> Result<()> {
        self.update_file_from(kind, name, &Channel::Beta).await
    }

    async fn update_file_from(&self, kind: FileKind, name: &str, channel: &Channel) -> Result<()> {
        // Only library files are served per reference; resolve nothing for rejected names.
        let library_ref = if kind == FileKind::Library && kind.accepts(name) {
            self.resolve_reported(channel).await?.name
        } else {
            self.config.channels.stable_ref.clone()
        };

        let files = FileUpdater::new(
            self.transport.as_ref(),
            &self.config.remote,
            &self.config.core,
            &self.paths,
            &*self.reporter,
        );
        match files.update_file(kind, name, &library_ref).await {
            FileOutcome::Updated => Ok(()),
            FileOutcome::BadExtension => Err(UpdateError::invalid_arguments(format!(
                "{name} does not have a {kind} file extension"
            ))
            .into()),
            FileOutcome::BadName => Err(UpdateError::invalid_arguments(format!(
                "{name} is not a plain file name"
            ))
            .into()),
            FileOutcome::Unavailable => {
                Err(UpdateError::network(format!("{name} could not be downloaded")).into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use crate::engine::FileKind;
    use crate::errors::UpdateError;
    use crate::request::Request;
    use assert_fs::prelude::*;

    #[tokio::test]
    async fn bad_extension_makes_no_network_call() {
        let h = Harness::new();

        let err = h
            .updater()
            .dispatch(Request::UpdateFile(FileKind::Script, "go2.rb".to_string()))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<UpdateError>(),
            Some(UpdateError::InvalidArguments { .. })
        ));
        assert!(h.reporter_text().contains("incorrect extension"));
        assert_eq!(h.transport.call_count(), 0);
    }

    #[tokio::test]
    async fn script_is_fetched_from_scripts_repository() {
        let h = Harness::new();
        let url = format!("{}/go2.lic", h.config.remote.scripts_url);
        h.transport.route(url.clone(), "# go2");

        h.updater()
            .dispatch(Request::UpdateFile(FileKind::Script, "go2.lic".to_string()))
            .await
            .unwrap();

        h.temp.child("scripts/go2.lic").assert("# go2");
        assert_eq!(h.transport.calls_to(&url), 1);
        assert!(h.reporter_text().contains("go2.lic has been updated."));
    }

    #[tokio::test]
    async fn unavailable_file_keeps_installed_copy() {
        let h = Harness::new();

        let err = h
            .updater()
            .dispatch(Request::UpdateFile(FileKind::Script, "alias.lic".to_string()))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<UpdateError>(),
            Some(UpdateError::NetworkFailure { .. })
        ));
        h.temp.child("scripts/alias.lic").assert("alias 5.14.3\n");
        assert!(h.reporter_text().contains("not available via lich5-update"));
    }

    #[tokio::test]
    async fn beta_library_file_comes_from_beta_reference() {
        let mut h = Harness::new();
        h.options.beta_override = Some("pre/beta/5.15.0".to_string());
        let url = format!("{}/version.rb", h.config.remote.library_url("pre/beta/5.15.0"));
        h.transport.route(url.clone(), "LICH_VERSION = \"5.15.0-beta.1\"\n");

        h.updater()
            .dispatch(Request::Beta(Some((FileKind::Library, "version.rb".to_string()))))
            .await
            .unwrap();

        assert_eq!(h.transport.calls_to(&url), 1);
        h.temp
            .child("lib/version.rb")
            .assert("LICH_VERSION = \"5.15.0-beta.1\"\n");
    }
}
