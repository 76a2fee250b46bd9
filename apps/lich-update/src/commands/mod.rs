//! Request handlers.
//!
//! [`Updater`] is the long-lived service object: it owns the configuration,
//! the installation paths, the transport, the metadata cache and the operator
//! I/O, and dispatches one [`Request`] at a time. Handlers live in submodules:
//!
//! - [`announce`] - Newer-release check
//! - [`update`] - Stable, beta and branch installs
//! - [`snapshot`] - Snapshot and revert
//! - [`file`] - Single-file updates
//!
//! Handlers report their own outcome, including failures, before returning an
//! error; the caller only maps the error to an exit code.

pub mod announce;
pub mod file;
pub mod snapshot;
pub mod update;

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::config::UpdaterConfig;
use crate::engine::{ChannelResolver, InstallPaths, MetadataClient, Transport};
use crate::errors::UpdateError;
use crate::lock::InstallLock;
use crate::report::{Prompt, SharedReporter};
use crate::request::{HELP, Request};

/// Inputs read from the environment once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Game code deciding the core script list (`GS3`, `DR`, ...).
    pub game: Option<String>,
    /// Pinned beta reference.
    pub beta_override: Option<String>,
}

/// Service object serving requests against one installation.
pub struct Updater<T> {
    config: UpdaterConfig,
    paths: InstallPaths,
    transport: Arc<T>,
    metadata: MetadataClient<T>,
    reporter: SharedReporter,
    prompt: Arc<dyn Prompt>,
    options: RunOptions,
}

impl<T: Transport> Updater<T> {
    /// Wires the updater together.
    pub fn new(
        config: UpdaterConfig,
        paths: InstallPaths,
        transport: Arc<T>,
        reporter: SharedReporter,
        prompt: Arc<dyn Prompt>,
        options: RunOptions,
    ) -> Self {
        let metadata =
            MetadataClient::new(transport.clone(), reporter.clone(), config.remote.cache_ttl());
        Self {
            config,
            paths,
            transport,
            metadata,
            reporter,
            prompt,
            options,
        }
    }

    /// Serves one request.
    ///
    /// Mutating requests hold the installation lock for their whole run. A
    /// revert with no snapshot to restore is refused before the lock file is
    /// created.
    ///
    /// # Errors
    ///
    /// Returns the handler's error after it has been reported, or
    /// [`UpdateError::InstallBusy`] if another process holds the lock.
    pub async fn dispatch(&self, request: Request) -> Result<()> {
        debug!(?request, root = %self.paths.root.display(), "dispatching");

        if request == Request::Revert {
            self.ensure_snapshot_exists()?;
        }

        let _lock = if request.is_mutating() {
            Some(self.lock()?)
        } else {
            None
        };

        match request {
            Request::Announce => self.announce().await,
            Request::Update => self.update().await,
            Request::Branch(name) => self.install_branch(&name).await,
            Request::Beta(None) => self.join_beta().await,
            Request::Beta(Some((kind, name))) => self.update_beta_file(kind, &name).await,
            Request::Snapshot => self.snapshot().map(|_| ()),
            Request::Revert => self.revert(),
            Request::UpdateFile(kind, name) => self.update_file(kind, &name).await,
            Request::Help => {
                self.reporter.report(HELP);
                Ok(())
            }
            Request::Unknown(raw) => {
                self.reporter.blank();
                self.reporter.report(&format!(
                    "Command '{raw}' unknown, illegitimate and ignored.  Exiting . . ."
                ));
                self.reporter.blank();
                Ok(())
            }
        }
    }

    fn lock(&self) -> Result<InstallLock> {
        InstallLock::acquire(&self.paths.lock_file(), &self.paths.root).inspect_err(|e| {
            if let Some(UpdateError::InstallBusy { .. }) = e.downcast_ref::<UpdateError>() {
                self.reporter.report(
                    "Another lich5-update is already working on this installation. Try again when it finishes.",
                );
            }
        })
    }

    fn resolver(&self) -> ChannelResolver<'_, T> {
        ChannelResolver::new(
            &self.config.channels,
            &self.config.remote,
            &self.metadata,
            self.options.beta_override.clone(),
        )
    }

    fn game(&self) -> Option<&str> {
        self.options.game.as_deref()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::engine::archive::fixtures;
    use crate::engine::transport::fake::FakeTransport;
    use crate::report::recording::{FixedPrompt, RecordingReporter};
    use assert_fs::prelude::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use walkdir::WalkDir;

    /// A seeded 5.14.3 installation with fakes for every collaborator.
    pub struct Harness {
        pub temp: assert_fs::TempDir,
        pub transport: Arc<FakeTransport>,
        pub reporter: Arc<RecordingReporter>,
        pub prompt: Arc<FixedPrompt>,
        pub config: UpdaterConfig,
        pub options: RunOptions,
    }

    impl Harness {
        pub fn new() -> Self {
            let temp = assert_fs::TempDir::new().unwrap();
            temp.child("lich.rbw").write_str("# 5.14.3 entry\n").unwrap();
            temp.child("lib/version.rb")
                .write_str("LICH_VERSION = \"5.14.3\"\n")
                .unwrap();
            temp.child("lib/common/util.rb").write_str("old util\n").unwrap();
            temp.child("scripts/alias.lic").write_str("alias 5.14.3\n").unwrap();
            temp.child("data/effect-list.xml").write_str("<local/>").unwrap();

            let mut config = UpdaterConfig::default();
            config.remote.api_base = "https://api.example.test".to_string();
            config.runtime.version = Some("3.3.0".to_string());

            Self {
                temp,
                transport: Arc::new(FakeTransport::new()),
                reporter: Arc::new(RecordingReporter::default()),
                prompt: Arc::new(FixedPrompt::answering(true)),
                config,
                options: RunOptions {
                    game: Some("GS3".to_string()),
                    beta_override: None,
                },
            }
        }

        pub fn paths(&self) -> InstallPaths {
            InstallPaths::with_root(self.temp.path().to_path_buf(), &self.config.layout)
        }

        pub fn updater(&self) -> Updater<FakeTransport> {
            Updater::new(
                self.config.clone(),
                self.paths(),
                self.transport.clone(),
                self.reporter.clone(),
                self.prompt.clone(),
                self.options.clone(),
            )
        }

        pub fn reporter_text(&self) -> String {
            self.reporter.transcript()
        }

        /// Publishes `tag` as the latest release with a matching asset.
        pub fn publish_latest(&self, tag: &str) -> String {
            let asset_url = format!("https://downloads.example.test/{tag}/lich-5.tar.gz");
            self.transport.route_json(
                self.config.remote.latest_release_url(),
                &json!({
                    "tag_name": tag,
                    "body": "Faster mapping.\n## What's Changed\n* PR #1",
                    "assets": [{ "name": "lich-5.tar.gz", "browser_download_url": asset_url }]
                }),
            );
            let version = tag.trim_start_matches('v');
            self.transport.route(asset_url.clone(), fixtures::installation(version));
            asset_url
        }

        /// Installed files outside `backup/` and `temp/`, by relative path.
        pub fn tree(&self) -> BTreeMap<String, Vec<u8>> {
            let paths = self.paths();
            WalkDir::new(self.temp.path())
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .filter(|e| !e.path().starts_with(&paths.backup) && !e.path().starts_with(&paths.temp))
                .map(|e| {
                    let rel = e.path().strip_prefix(self.temp.path()).unwrap();
                    (rel.to_string_lossy().into_owned(), std::fs::read(e.path()).unwrap())
                })
                .collect()
        }

        pub fn snapshot_count(&self) -> usize {
            let backup = self.paths().backup;
            std::fs::read_dir(&backup).map_or(0, |entries| entries.count())
        }
    }
}
