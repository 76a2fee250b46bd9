//! Channel to reference resolution.
//!
//! A [`Channel`] is what the operator asks for; a [`ReleaseReference`] is the
//! concrete tag or branch that gets downloaded.
//!
//! ## Resolution Rules
//!
//! | Channel | Reference |
//! |---------|-----------|
//! | `stable`, `production` | the configured trunk reference, no network |
//! | explicit branch | the name, trimmed; empty is an error |
//! | `beta` | override variable, else newest pre-release newer than stable, else newest beta branch newer than stable |
//!
//! Beta resolution never falls back to stable. When nothing qualifies the
//! caller gets a [`UpdateError::ChannelResolution`] naming every attempt.

use std::fmt;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use tracing::debug;

use super::metadata::{Branch, MetadataClient, Release, latest_stable_tag};
use super::transport::Transport;
use super::version::VersionKey;
use crate::config::{ChannelConfig, RemoteConfig};
use crate::errors::UpdateError;

/// Override values shaped like a release tag are treated as tags.
static TAG_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?[0-9]+\.[0-9]+").expect("tag shape is a valid regex")
});

/// A named update track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    /// Production releases.
    Stable,
    /// Pre-releases and beta branches.
    Beta,
    /// A specific branch, named by the operator.
    Branch(String),
}

impl Channel {
    /// Maps a channel name; anything but `stable`/`production`/`beta` is a branch.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "stable" | "production" => Self::Stable,
            "beta" => Self::Beta,
            _ => Self::Branch(name.to_string()),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => f.write_str("stable"),
            Self::Beta => f.write_str("beta"),
            Self::Branch(name) => write!(f, "branch {name}"),
        }
    }
}

/// Whether a reference names a tag or a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// A release tag.
    Tag,
    /// A branch head.
    Branch,
}

/// A concrete remote reference plus the channel it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseReference {
    /// Tag or branch name.
    pub name: String,
    /// Tag or branch.
    pub kind: ReferenceKind,
    /// The channel that was resolved.
    pub channel: Channel,
}

impl ReleaseReference {
    /// Version embedded in the reference name.
    #[must_use]
    pub fn version(&self) -> VersionKey {
        VersionKey::parse(&self.name)
    }

    /// Tarball URL of the reference.
    #[must_use]
    pub fn archive_url(&self, remote: &RemoteConfig) -> String {
        match self.kind {
            ReferenceKind::Tag => remote.tag_archive_url(&self.name),
            ReferenceKind::Branch => remote.branch_archive_url(&self.name),
        }
    }
}

/// Resolves channels against configuration, an optional override and the
/// release index.
pub struct ChannelResolver<'a, T> {
    channels: &'a ChannelConfig,
    remote: &'a RemoteConfig,
    metadata: &'a MetadataClient<T>,
    beta_override: Option<String>,
}

impl<'a, T: Transport> ChannelResolver<'a, T> {
    /// Creates a resolver. `beta_override` is the value of the override
    /// variable, read once at startup.
    pub fn new(
        channels: &'a ChannelConfig,
        remote: &'a RemoteConfig,
        metadata: &'a MetadataClient<T>,
        beta_override: Option<String>,
    ) -> Self {
        Self {
            channels,
            remote,
            metadata,
            beta_override: beta_override
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        }
    }

    /// Resolves a channel to a concrete reference.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidArguments`] for an empty branch name and
    /// [`UpdateError::ChannelResolution`] when no beta reference qualifies.
    pub async fn resolve(&self, channel: &Channel) -> Result<ReleaseReference> {
        match channel {
            Channel::Stable => Ok(ReleaseReference {
                name: self.channels.stable_ref.clone(),
                kind: ReferenceKind::Branch,
                channel: Channel::Stable,
            }),
            Channel::Branch(name) => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(UpdateError::invalid_arguments("branch name cannot be empty").into());
                }
                Ok(ReleaseReference {
                    name: name.to_string(),
                    kind: ReferenceKind::Branch,
                    channel: Channel::Branch(name.to_string()),
                })
            }
            Channel::Beta => self.resolve_beta().await,
        }
    }

    async fn resolve_beta(&self) -> Result<ReleaseReference> {
        if let Some(value) = &self.beta_override {
            debug!(reference = %value, "beta reference pinned by {}", self.channels.beta_override_env);
            let kind = if TAG_SHAPE.is_match(value) {
                ReferenceKind::Tag
            } else {
                ReferenceKind::Branch
            };
            return Ok(beta_reference(value.clone(), kind));
        }

        let releases: Option<Vec<Release>> = self.metadata.fetch(&self.remote.releases_url()).await;
        let Some(releases) = releases else {
            return Err(beta_failure("the release list could not be fetched"));
        };
        let Some(stable_tag) = latest_stable_tag(&releases) else {
            return Err(beta_failure("the newest stable release could not be determined"));
        };
        let stable = VersionKey::parse(stable_tag);
        debug!(%stable, "newest stable release");

        if let Some(tag) = newest_prerelease_after(&releases, &stable) {
            debug!(tag, "beta resolved to pre-release");
            return Ok(beta_reference(tag.to_string(), ReferenceKind::Tag));
        }

        let branches: Option<Vec<Branch>> = self.metadata.fetch(&self.remote.branches_url()).await;
        if let Some(name) = branches
            .as_deref()
            .and_then(|b| newest_beta_branch_after(b, &self.channels.beta_branch_prefix, &stable))
        {
            debug!(branch = name, "beta resolved to branch");
            return Ok(beta_reference(name.to_string(), ReferenceKind::Branch));
        }

        Err(beta_failure(&format!(
            "no override set, no pre-release newer than {stable_tag}, and no {} branch newer than {stable_tag}",
            self.channels.beta_branch_prefix
        )))
    }
}

fn beta_reference(name: String, kind: ReferenceKind) -> ReleaseReference {
    ReleaseReference {
        name,
        kind,
        channel: Channel::Beta,
    }
}

fn beta_failure(reason: &str) -> anyhow::Error {
    UpdateError::channel_resolution("beta", reason).into()
}

/// Tag of the newest published pre-release strictly newer than `stable`.
#[must_use]
pub fn newest_prerelease_after<'r>(releases: &'r [Release], stable: &VersionKey) -> Option<&'r str> {
    releases
        .iter()
        .filter(|release| !release.draft && release.is_prerelease())
        .filter(|release| release.version() > *stable)
        .max_by(|a, b| a.version().cmp(&b.version()))
        .map(|release| release.tag_name.as_str())
}

/// Newest branch under the beta prefix whose version is newer than `stable`.
#[must_use]
pub fn newest_beta_branch_after<'b>(
    branches: &'b [Branch],
    prefix: &str,
    stable: &VersionKey,
) -> Option<&'b str> {
    branches
        .iter()
        .filter(|branch| branch.name.starts_with(prefix))
        .map(|branch| (VersionKey::parse(&branch.name), branch.name.as_str()))
        .filter(|(version, _)| version > stable)
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::transport::fake::FakeTransport;
    use crate::report::recording::RecordingReporter;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        transport: Arc<FakeTransport>,
        metadata: MetadataClient<FakeTransport>,
        channels: ChannelConfig,
        remote: RemoteConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let transport = Arc::new(FakeTransport::new());
            let metadata = MetadataClient::new(
                transport.clone(),
                Arc::new(RecordingReporter::default()),
                Duration::from_secs(300),
            );
            Self {
                transport,
                metadata,
                channels: ChannelConfig::default(),
                remote: RemoteConfig::default(),
            }
        }

        fn resolver(&self, beta_override: Option<&str>) -> ChannelResolver<'_, FakeTransport> {
            ChannelResolver::new(
                &self.channels,
                &self.remote,
                &self.metadata,
                beta_override.map(ToString::to_string),
            )
        }

        fn releases(&self, value: serde_json::Value) {
            self.transport.route_json(self.remote.releases_url(), &value);
        }

        fn branches(&self, value: serde_json::Value) {
            self.transport.route_json(self.remote.branches_url(), &value);
        }
    }

    fn error_kind(err: &anyhow::Error) -> &UpdateError {
        err.downcast_ref::<UpdateError>().expect("typed update error")
    }

    #[tokio::test]
    async fn stable_and_production_resolve_identically_without_network() {
        let fx = Fixture::new();
        let resolver = fx.resolver(None);

        let stable = resolver.resolve(&Channel::parse("stable")).await.unwrap();
        let production = resolver.resolve(&Channel::parse("Production")).await.unwrap();

        assert_eq!(stable, production);
        assert_eq!(stable.name, "main");
        assert_eq!(fx.transport.call_count(), 0);
    }

    #[tokio::test]
    async fn branch_names_are_trimmed() {
        let fx = Fixture::new();
        let reference = fx
            .resolver(None)
            .resolve(&Channel::Branch("  feature/new-system ".to_string()))
            .await
            .unwrap();
        assert_eq!(reference.name, "feature/new-system");
        assert_eq!(reference.kind, ReferenceKind::Branch);
    }

    #[tokio::test]
    async fn empty_branch_name_is_rejected() {
        let fx = Fixture::new();
        let err = fx
            .resolver(None)
            .resolve(&Channel::Branch("   ".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(error_kind(&err), UpdateError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn beta_override_wins_without_network() {
        let fx = Fixture::new();
        let reference = fx
            .resolver(Some("v5.16.0-beta.2"))
            .resolve(&Channel::Beta)
            .await
            .unwrap();
        assert_eq!(reference.name, "v5.16.0-beta.2");
        assert_eq!(reference.kind, ReferenceKind::Tag);
        assert_eq!(fx.transport.call_count(), 0);

        let branch = fx.resolver(Some("pre/beta/5.16.0")).resolve(&Channel::Beta).await.unwrap();
        assert_eq!(branch.kind, ReferenceKind::Branch);
    }

    #[tokio::test]
    async fn blank_override_is_ignored() {
        let fx = Fixture::new();
        fx.releases(json!([
            { "tag_name": "v5.15.0-beta.1", "prerelease": true },
            { "tag_name": "v5.14.3" }
        ]));
        let reference = fx.resolver(Some("  ")).resolve(&Channel::Beta).await.unwrap();
        assert_eq!(reference.name, "v5.15.0-beta.1");
    }

    #[tokio::test]
    async fn beta_picks_newest_prerelease_above_stable() {
        let fx = Fixture::new();
        fx.releases(json!([
            { "tag_name": "v5.15.0-beta.2", "prerelease": true },
            { "tag_name": "v5.15.0-beta.1", "prerelease": true },
            { "tag_name": "v5.14.3" },
            { "tag_name": "v5.14.0-beta.9", "prerelease": true }
        ]));
        let reference = fx.resolver(None).resolve(&Channel::Beta).await.unwrap();
        assert_eq!(reference.name, "v5.15.0-beta.2");
        assert_eq!(reference.kind, ReferenceKind::Tag);
        assert_eq!(reference.channel, Channel::Beta);
    }

    #[tokio::test]
    async fn beta_falls_back_to_prefixed_branch() {
        let fx = Fixture::new();
        fx.releases(json!([{ "tag_name": "v5.14.3" }]));
        fx.branches(json!([
            { "name": "main" },
            { "name": "pre/beta/5.14.1" },
            { "name": "pre/beta/5.15.0" },
            { "name": "feature/5.99.0" }
        ]));
        let reference = fx.resolver(None).resolve(&Channel::Beta).await.unwrap();
        assert_eq!(reference.name, "pre/beta/5.15.0");
        assert_eq!(reference.kind, ReferenceKind::Branch);
    }

    #[tokio::test]
    async fn beta_never_falls_back_to_stable() {
        let fx = Fixture::new();
        fx.releases(json!([{ "tag_name": "v5.14.3" }]));
        fx.branches(json!([{ "name": "main" }, { "name": "pre/beta/5.14.2" }]));

        let err = fx.resolver(None).resolve(&Channel::Beta).await.unwrap_err();
        let kind = error_kind(&err);
        assert!(matches!(kind, UpdateError::ChannelResolution { .. }));
        assert!(kind.to_string().contains("v5.14.3"));
    }

    #[tokio::test]
    async fn beta_fails_when_release_list_is_unreachable() {
        let fx = Fixture::new();
        let err = fx.resolver(None).resolve(&Channel::Beta).await.unwrap_err();
        assert!(error_kind(&err).to_string().contains("could not be fetched"));
    }

    #[test]
    fn archive_url_depends_on_kind() {
        let remote = RemoteConfig::default();
        let tag = beta_reference("v5.15.0-beta.1".to_string(), ReferenceKind::Tag);
        assert!(tag.archive_url(&remote).ends_with("/archive/refs/tags/v5.15.0-beta.1.tar.gz"));
        let branch = beta_reference("pre/beta/5.15.0".to_string(), ReferenceKind::Branch);
        assert!(branch.archive_url(&remote).ends_with("/archive/refs/heads/pre/beta/5.15.0.tar.gz"));
    }
}
