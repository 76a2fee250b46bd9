//! Updater configuration.
//!
//! Remote locations, installation layout and the "core" file allowlists are
//! data, not code: they change whenever the upstream project reorganizes. They
//! live in an optional TOML file; every key has a default so a partial file (or
//! no file at all) is valid.
//!
//! ## File Format
//!
//! ```toml
//! [remote]
//! api_base = "https://api.github.com"
//! repository = "elanthia-online/lich-5"
//! cache_ttl_secs = 300
//!
//! [channels]
//! stable_ref = "main"
//! beta_branch_prefix = "pre/beta"
//!
//! [core]
//! snapshot_scripts = ["alias.lic", "autostart.lic"]
//!
//! [core.scripts]
//! all = ["alias.lic", "go2.lic"]
//! gs = ["ewaggle.lic"]
//! dr = ["dependency.lic"]
//!
//! [runtime]
//! version = "3.2.2"
//! ```
//!
//! ## Lookup
//!
//! `--config <FILE>` wins; otherwise `<install root>/data/lich-update.toml` is
//! read when it exists.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the API base URL.
pub const API_BASE_ENV: &str = "LICH_UPDATE_API";

/// Config file name looked up inside the data directory.
pub const CONFIG_FILE_NAME: &str = "lich-update.toml";

/// Root configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Remote release index and raw file hosts.
    pub remote: RemoteConfig,
    /// Channel naming conventions.
    pub channels: ChannelConfig,
    /// Names of the managed paths inside an installation.
    pub layout: LayoutConfig,
    /// Core file allowlists.
    pub core: CoreConfig,
    /// Runtime compatibility settings.
    pub runtime: RuntimeConfig,
}

/// Remote endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the release metadata API.
    pub api_base: String,
    /// `owner/name` of the Lich repository.
    pub repository: String,
    /// Host serving branch and tag tarballs.
    pub archive_base: String,
    /// Host serving raw repository files.
    pub raw_base: String,
    /// Canonical location of core scripts and data files.
    pub scripts_url: String,
    /// Canonical location of DragonRealms-only scripts.
    pub dr_scripts_url: String,
    /// Substring identifying the release tarball among release assets.
    pub asset_pattern: String,
    /// User-Agent header sent with every request.
    pub user_agent: String,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
    /// How long fetched metadata stays fresh.
    pub cache_ttl_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            repository: "elanthia-online/lich-5".to_string(),
            archive_base: "https://github.com".to_string(),
            raw_base: "https://raw.githubusercontent.com".to_string(),
            scripts_url: "https://raw.githubusercontent.com/elanthia-online/scripts/master/scripts"
                .to_string(),
            dr_scripts_url: "https://raw.githubusercontent.com/elanthia-online/dr-scripts/main"
                .to_string(),
            asset_pattern: "lich-5.tar.gz".to_string(),
            user_agent: format!("lich5-update/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 60,
            cache_ttl_secs: 300,
        }
    }
}

impl RemoteConfig {
    /// Applies the `LICH_UPDATE_API` override to the API base.
    ///
    /// Empty or whitespace-only values are treated as unset.
    pub fn apply_env_overrides(&mut self) {
        if let Some(base) = std::env::var(API_BASE_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
        {
            self.api_base = base.trim().to_string();
        }
    }

    fn api(&self) -> &str {
        self.api_base.trim_end_matches('/')
    }

    /// `GET /repos/{repo}/releases/latest`.
    #[must_use]
    pub fn latest_release_url(&self) -> String {
        format!("{}/repos/{}/releases/latest", self.api(), self.repository)
    }

    /// `GET /repos/{repo}/releases`, newest first.
    #[must_use]
    pub fn releases_url(&self) -> String {
        format!("{}/repos/{}/releases?per_page=100", self.api(), self.repository)
    }

    /// `GET /repos/{repo}/releases/tags/{tag}`.
    #[must_use]
    pub fn release_by_tag_url(&self, tag: &str) -> String {
        format!("{}/repos/{}/releases/tags/{tag}", self.api(), self.repository)
    }

    /// `GET /repos/{repo}/branches`.
    #[must_use]
    pub fn branches_url(&self) -> String {
        format!("{}/repos/{}/branches?per_page=100", self.api(), self.repository)
    }

    /// Tarball of a branch head.
    #[must_use]
    pub fn branch_archive_url(&self, branch: &str) -> String {
        format!(
            "{}/{}/archive/refs/heads/{branch}.tar.gz",
            self.archive_base.trim_end_matches('/'),
            self.repository
        )
    }

    /// Tarball of a tag.
    #[must_use]
    pub fn tag_archive_url(&self, tag: &str) -> String {
        format!(
            "{}/{}/archive/refs/tags/{tag}.tar.gz",
            self.archive_base.trim_end_matches('/'),
            self.repository
        )
    }

    /// Raw library directory at a reference.
    #[must_use]
    pub fn library_url(&self, reference: &str) -> String {
        format!(
            "{}/{}/{reference}/lib",
            self.raw_base.trim_end_matches('/'),
            self.repository
        )
    }

    /// Request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Metadata cache TTL as a `Duration`.
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Channel naming conventions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChannelConfig {
    /// Reference the `stable`/`production` channel maps to.
    pub stable_ref: String,
    /// Prefix shared by beta branches (`pre/beta/5.15.0`, `pre/beta-5.15.0`).
    pub beta_branch_prefix: String,
    /// Environment variable that pins the beta reference.
    pub beta_override_env: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            stable_ref: "main".to_string(),
            beta_branch_prefix: "pre/beta".to_string(),
            beta_override_env: "LICH_BETA_REF".to_string(),
        }
    }
}

/// Managed paths relative to the installation root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LayoutConfig {
    /// Main executable entry point.
    pub executable: String,
    /// Library tree.
    pub lib_dir: String,
    /// User and core scripts.
    pub scripts_dir: String,
    /// Data files.
    pub data_dir: String,
    /// Snapshot root.
    pub backup_dir: String,
    /// Scratch area for downloads and extraction.
    pub temp_dir: String,
    /// Version file, relative to the library tree.
    pub version_file: String,
    /// Installed-version marker, relative to the data directory.
    pub state_file: String,
    /// Prefix of snapshot directory names.
    pub snapshot_prefix: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            executable: "lich.rbw".to_string(),
            lib_dir: "lib".to_string(),
            scripts_dir: "scripts".to_string(),
            data_dir: "data".to_string(),
            backup_dir: "backup".to_string(),
            temp_dir: "temp".to_string(),
            version_file: "version.rb".to_string(),
            state_file: "lich-update.json".to_string(),
            snapshot_prefix: "L5-snapshot".to_string(),
        }
    }
}

/// Core file allowlists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoreConfig {
    /// Scripts copied into every snapshot when present.
    pub snapshot_scripts: Vec<String>,
    /// Scripts re-downloaded after an update, keyed by game (`all`, `gs`, `dr`).
    pub scripts: BTreeMap<String, Vec<String>>,
    /// Data files that may carry local edits; renamed aside before refresh.
    pub preserved_data: Vec<String>,
    /// Script served from the DragonRealms repository instead.
    pub dr_hosted_scripts: Vec<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(ToString::to_string).collect::<Vec<_>>();
        let mut scripts = BTreeMap::new();
        scripts.insert(
            "all".to_string(),
            strings(&[
                "alias.lic",
                "autostart.lic",
                "go2.lic",
                "jinx.lic",
                "log.lic",
                "logxml.lic",
                "map.lic",
                "repository.lic",
                "vars.lic",
                "version.lic",
            ]),
        );
        scripts.insert("gs".to_string(), strings(&["ewaggle.lic", "foreach.lic"]));
        scripts.insert("dr".to_string(), strings(&["dependency.lic"]));

        Self {
            snapshot_scripts: strings(&[
                "alias.lic",
                "autostart.lic",
                "dependency.lic",
                "ewaggle.lic",
                "foreach.lic",
                "go2.lic",
                "infomon.lic",
                "jinx.lic",
                "lnet.lic",
                "log.lic",
                "logxml.lic",
                "map.lic",
                "repository.lic",
                "vars.lic",
                "version.lic",
            ]),
            scripts,
            preserved_data: strings(&["effect-list.xml"]),
            dr_hosted_scripts: strings(&["dependency.lic"]),
        }
    }
}

impl CoreConfig {
    /// Core scripts for a game: the shared list followed by the game's own.
    #[must_use]
    pub fn scripts_for(&self, game_key: &str) -> Vec<&str> {
        ["all", game_key]
            .iter()
            .filter_map(|key| self.scripts.get(*key))
            .flatten()
            .map(String::as_str)
            .collect()
    }
}

/// Runtime compatibility settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Key of the minimum-runtime line in the artifact's version file.
    pub requirement_key: String,
    /// Runtime version to assume instead of probing the host.
    pub version: Option<String>,
    /// Interpreter probed for its version.
    pub interpreter: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            requirement_key: "REQUIRED_RUBY".to_string(),
            version: None,
            interpreter: "ruby".to_string(),
        }
    }
}

impl UpdaterConfig {
    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for this schema.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse updater configuration")
    }

    /// Loads configuration from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Loads `explicit` if given, else `fallback` if it exists, else defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a selected file cannot be read or parsed.
    pub fn load_or_default(explicit: Option<&Path>, fallback: &Path) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None if fallback.is_file() => Self::load(fallback),
            None => Ok(Self::default()),
        }
    }
}
