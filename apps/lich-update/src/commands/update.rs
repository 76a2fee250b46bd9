//! Stable, beta and branch installs.
//!
//! All three share one pipeline: snapshot, download into a scratch area,
//! validate the extracted tree, check runtime compatibility, apply. Nothing
//! under the installation root changes before the apply step, so every
//! failure up to the compatibility check leaves the installation as it was.

use anyhow::Result;
use tracing::info;

use super::Updater;
use crate::engine::compat::Compatibility;
use crate::engine::paths::read_version_label;
use crate::engine::{
    ApplyTarget, ArtifactFetcher, ArtifactSource, Channel, CompatibilityGate, FileUpdater,
    ReferenceKind, Release, ReleaseReference, ScratchArea, Transport, UpdateApplier,
};
use crate::errors::UpdateError;

const BETA_NOTICE: &[&str] = &[
    "You are electing to participate in the beta testing of the next Lich release.",
    "This beta test will include only Lich code, and does not include Ruby updates.",
    "While we are confident in the beta, you may encounter problems.",
    "If you do, run 'lich5-update --revert' to return to your prior version.",
];

/// One install to run through the pipeline.
struct InstallPlan {
    /// Shown while downloading; replaced by the artifact's own version label.
    label: String,
    /// Tag or branch recorded in the installed-state marker.
    reference: String,
    channel: Channel,
    source: ArtifactSource,
    /// Reference core library files are refreshed from.
    library_ref: String,
}

impl<T: Transport> Updater<T> {
    /// Installs the newest stable release when it is newer than the installed one.
    ///
    /// # Errors
    ///
    /// Returns metadata, download, validation, compatibility or apply errors.
    pub async fn update(&self) -> Result<()> {
        let release = self.latest_release().await?;
        let current = self.paths.installed_version();
        if release.version() <= current {
            self.report_current(&current.to_string());
            return Ok(());
        }

        let library_ref = self.resolve_reported(&Channel::Stable).await?.name;
        let plan = InstallPlan {
            label: release.version_label().to_string(),
            reference: release.tag_name.clone(),
            channel: Channel::Stable,
            source: self.release_source(&release),
            library_ref,
        };
        self.install(plan).await
    }

    /// Asks for beta consent, then installs the resolved beta reference.
    ///
    /// # Errors
    ///
    /// Returns resolution or install errors. Declining is not an error.
    pub async fn join_beta(&self) -> Result<()> {
        self.reporter.blank();
        for line in BETA_NOTICE {
            self.reporter.report(line);
        }
        self.reporter.blank();
        if !self
            .prompt
            .confirm("Do you want to join the beta test and install it now?")
        {
            self.reporter
                .report("Aborting beta test installation request.  Thank you for considering!");
            self.reporter.blank();
            return Ok(());
        }
        self.reporter
            .report("Thank you for helping test the next Lich release!");

        let reference = self.resolve_reported(&Channel::Beta).await?;
        let target = reference.version();
        let current = self.paths.installed_version();
        if !target.is_lowest() && target <= current {
            self.report_current(&current.to_string());
            return Ok(());
        }

        let plan = InstallPlan {
            label: reference.name.trim_start_matches('v').to_string(),
            source: self.reference_source(&reference).await,
            library_ref: reference.name.clone(),
            reference: reference.name,
            channel: Channel::Beta,
        };
        self.install(plan).await
    }

    /// Installs the head of a named branch, regardless of its version.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidArguments`] for an empty name, otherwise
    /// download, validation, compatibility or apply errors.
    pub async fn install_branch(&self, name: &str) -> Result<()> {
        let reference = match self
            .resolver()
            .resolve(&Channel::Branch(name.to_string()))
            .await
        {
            Ok(reference) => reference,
            Err(e) => {
                self.reporter
                    .report("A branch name is required, e.g. --branch=pre/beta/5.15.0");
                return Err(e);
            }
        };

        let plan = InstallPlan {
            label: reference.name.clone(),
            source: ArtifactSource::unverified(reference.archive_url(&self.config.remote)),
            library_ref: reference.name.clone(),
            reference: reference.name,
            channel: reference.channel,
        };
        self.install(plan).await.inspect_err(|e| {
            match e.downcast_ref::<UpdateError>() {
                Some(UpdateError::DownloadFailed { .. }) => self.reporter.report(&format!(
                    "Could not download branch '{name}'. Check the branch name and try again."
                )),
                Some(UpdateError::ArtifactStructureInvalid { .. }) => self.reporter.report(
                    &format!("Branch '{name}' does not appear to be a valid Lich installation."),
                ),
                _ => {}
            }
        })
    }

    /// Resolves a channel, reporting why it failed.
    pub(super) async fn resolve_reported(&self, channel: &Channel) -> Result<ReleaseReference> {
        self.resolver().resolve(channel).await.inspect_err(|e| {
            self.reporter.report(&format!("Could not find a {channel} release to install: {e}"));
        })
    }

    /// The release tarball asset with its digest, else the tag archive.
    fn release_source(&self, release: &Release) -> ArtifactSource {
        match release.asset_matching(&self.config.remote.asset_pattern) {
            Some(asset) => ArtifactSource {
                url: asset.browser_download_url.clone(),
                sha256: asset.sha256(),
            },
            None => ArtifactSource::unverified(self.config.remote.tag_archive_url(&release.tag_name)),
        }
    }

    async fn reference_source(&self, reference: &ReleaseReference) -> ArtifactSource {
        if reference.kind == ReferenceKind::Tag {
            let url = self.config.remote.release_by_tag_url(&reference.name);
            if let Some(release) = self.metadata.fetch::<Release>(&url).await {
                return self.release_source(&release);
            }
        }
        ArtifactSource::unverified(reference.archive_url(&self.config.remote))
    }

    async fn install(&self, plan: InstallPlan) -> Result<()> {
        self.reporter.blank();
        self.reporter.report(
            "Getting ready to update.  First we will create a snapshot in case there are problems with the update.",
        );
        self.snapshot()?;

        self.reporter.blank();
        self.reporter
            .report(&format!("Downloading Lich5 version {}", plan.label));

        match self.fetch_and_apply(&plan).await {
            Ok(label) => {
                self.reporter.blank();
                self.reporter
                    .report(&format!("Lich5 has been updated to Lich5 version {label}"));
                self.reporter
                    .report("You should exit the game, then log back in.  This will start the game");
                self.reporter.report("with your updated Lich.  Enjoy!");
                self.reporter.blank();
                Ok(())
            }
            Err(e) => {
                self.report_install_failure(&e);
                Err(e)
            }
        }
    }

    /// Runs the pipeline after the snapshot and returns the installed label.
    async fn fetch_and_apply(&self, plan: &InstallPlan) -> Result<String> {
        let layout = &self.config.layout;
        let scratch = ScratchArea::create(&self.paths.temp, &plan.reference)?;
        let fetcher = ArtifactFetcher::new(self.transport.as_ref(), layout);

        let root = fetcher.fetch_and_extract(&plan.source, &scratch).await?;
        fetcher.validate_structure(&root)?;
        let label = read_version_label(&root.join(&layout.lib_dir).join(&layout.version_file))
            .unwrap_or_else(|| plan.label.clone());

        let gate = CompatibilityGate::detect(&self.config.runtime, layout);
        if let Compatibility::Unverified { required } = gate.check(&root)? {
            self.reporter.report(&format!(
                "Could not determine the installed Ruby version; Lich5 {label} asks for Ruby {required} or newer."
            ));
        }

        let files = FileUpdater::new(
            self.transport.as_ref(),
            &self.config.remote,
            &self.config.core,
            &self.paths,
            &*self.reporter,
        );
        let applier = UpdateApplier::new(&self.paths, layout, files, &*self.reporter, self.game());
        let target = ApplyTarget {
            version: label.clone(),
            reference: plan.reference.clone(),
            channel: plan.channel.to_string(),
        };
        applier.apply(&root, &target, &plan.library_ref).await?;
        info!(version = %label, channel = %plan.channel, "install complete");
        Ok(label)
    }

    fn report_install_failure(&self, e: &anyhow::Error) {
        self.reporter.blank();
        match e.downcast_ref::<UpdateError>() {
            Some(err @ UpdateError::ApplyPartialFailure { .. }) => {
                self.reporter.report("*** UPDATE INCOMPLETE ***");
                self.reporter.report(&err.to_string());
                self.reporter.report(
                    "Run 'lich5-update --revert' to restore the snapshot taken before this update.",
                );
            }
            Some(err) if err.is_before_mutation() => {
                self.reporter.report(&format!("Update aborted: {err}"));
                self.reporter.report("No installed files were changed.");
            }
            _ => self.reporter.report(&format!("Update aborted: {e:#}")),
        }
        self.reporter.blank();
    }
}
