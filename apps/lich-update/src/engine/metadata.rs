//! Release index client with a time-bounded cache.
//!
//! All remote metadata (the latest release, the release list, branch names)
//! comes through [`MetadataClient::fetch_json`]. A successful response is kept
//! for the configured TTL and served from memory until it expires, so one
//! command that needs the release list in several places issues a single
//! request.
//!
//! Failures are reported through the [`Reporter`] and surface as `None`;
//! callers read `None` as "cannot determine", never as "no releases". Failed
//! fetches are not cached: the next call goes back to the network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::transport::Transport;
use super::version::VersionKey;
use crate::report::SharedReporter;

/// Heading after which release notes list individual pull requests.
const CHANGES_HEADING: &str = "## What's Changed";

/// A published release as returned by the release API.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Release {
    /// Tag the release was cut from, e.g. `v5.14.3`.
    pub tag_name: String,
    /// Release notes in Markdown.
    #[serde(default)]
    pub body: Option<String>,
    /// Marked as a pre-release by the publisher.
    #[serde(default)]
    pub prerelease: bool,
    /// Unpublished draft.
    #[serde(default)]
    pub draft: bool,
    /// Downloadable files attached to the release.
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// A file attached to a release.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Asset {
    /// File name.
    pub name: String,
    /// Direct download URL.
    pub browser_download_url: String,
    /// Content digest in `algorithm:hex` form, when the host publishes one.
    #[serde(default)]
    pub digest: Option<String>,
}

/// A repository branch.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Branch {
    /// Branch name, e.g. `pre/beta/5.15.0`.
    pub name: String,
}

impl Release {
    /// Version encoded in the tag.
    #[must_use]
    pub fn version(&self) -> VersionKey {
        VersionKey::parse(&self.tag_name)
    }

    /// The tag with any leading `v` removed.
    #[must_use]
    pub fn version_label(&self) -> &str {
        self.tag_name.strip_prefix('v').unwrap_or(&self.tag_name)
    }

    /// Pre-release flag or a pre-release label in the tag.
    #[must_use]
    pub fn is_prerelease(&self) -> bool {
        self.prerelease || self.version().is_prerelease()
    }

    /// Release notes up to the per-PR change list, trimmed.
    #[must_use]
    pub fn change_summary(&self) -> String {
        let body = self.body.as_deref().unwrap_or_default();
        let summary = body.split(CHANGES_HEADING).next().unwrap_or_default();
        summary.trim().to_string()
    }

    /// First asset whose name contains `pattern`.
    #[must_use]
    pub fn asset_matching(&self, pattern: &str) -> Option<&Asset> {
        self.assets.iter().find(|asset| asset.name.contains(pattern))
    }
}

impl Asset {
    /// Lowercase SHA-256 hex digest, if published.
    #[must_use]
    pub fn sha256(&self) -> Option<String> {
        let digest = self.digest.as_deref()?;
        let (algorithm, hex) = digest.split_once(':')?;
        (algorithm.eq_ignore_ascii_case("sha256") && !hex.is_empty())
            .then(|| hex.to_ascii_lowercase())
    }
}

/// Tag of the newest published, non-prerelease release.
///
/// Drafts and anything flagged or labelled as a pre-release are ignored.
#[must_use]
pub fn latest_stable_tag(releases: &[Release]) -> Option<&str> {
    releases
        .iter()
        .filter(|release| !release.draft && !release.is_prerelease())
        .filter(|release| !release.version().is_lowest())
        .max_by(|a, b| a.version().cmp(&b.version()))
        .map(|release| release.tag_name.as_str())
}

struct CacheEntry {
    data: Value,
    fetched_at: Instant,
}

/// Fetches JSON metadata, caching successful responses per URL.
pub struct MetadataClient<T> {
    transport: Arc<T>,
    reporter: SharedReporter,
    ttl: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl<T: Transport> MetadataClient<T> {
    /// Creates a client with an empty cache.
    pub fn new(transport: Arc<T>, reporter: SharedReporter, ttl: Duration) -> Self {
        Self {
            transport,
            reporter,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the JSON document at `url`, from cache when still fresh.
    ///
    /// `None` means the document could not be fetched or parsed; the failure
    /// has already been reported.
    pub async fn fetch_json(&self, url: &str) -> Option<Value> {
        if let Some(data) = self.cached(url) {
            debug!(url, "metadata cache hit");
            return Some(data);
        }

        let body = match self.transport.get(url).await {
            Ok(body) => body,
            Err(e) => {
                warn!(url, error = %e, "metadata fetch failed");
                self.reporter
                    .report(&format!("Unable to reach the release server: {e:#}"));
                return None;
            }
        };

        let data: Value = match serde_json::from_slice(&body) {
            Ok(data) => data,
            Err(e) => {
                warn!(url, error = %e, "metadata is not valid JSON");
                self.reporter
                    .report(&format!("The release server sent an unreadable response: {e}"));
                return None;
            }
        };

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                url.to_string(),
                CacheEntry {
                    data: data.clone(),
                    fetched_at: Instant::now(),
                },
            );
        }
        Some(data)
    }

    /// Fetches `url` and deserializes it into `D`.
    pub async fn fetch<D: DeserializeOwned>(&self, url: &str) -> Option<D> {
        let data = self.fetch_json(url).await?;
        match serde_json::from_value(data) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(url, error = %e, "metadata has an unexpected shape");
                self.reporter
                    .report(&format!("The release server sent unexpected data: {e}"));
                None
            }
        }
    }

    fn cached(&self, url: &str) -> Option<Value> {
        let cache = self.cache.lock().ok()?;
        let entry = cache.get(url)?;
        (entry.fetched_at.elapsed() < self.ttl).then(|| entry.data.clone())
    }
}
