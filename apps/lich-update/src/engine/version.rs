//! Version normalization for release tags, branch names and version files.
//!
//! Lich references come in many shapes: `v5.14.3`, `5.15.0-beta.1`,
//! `pre/beta/5.15.0`, `pre/beta-5.15.0-beta.1`. [`VersionKey::parse`] folds all
//! of them into a [`semver::Version`] so they can be ordered, and degrades to a
//! sentinel that sorts below every real version when no numeric pattern exists.
//!
//! ## Ordering
//!
//! ```text
//! <unparsable>  <  5.14.3  <  5.15.0-beta  <  5.15.0-beta.1  <  5.15.0-rc.1  <  5.15.0
//! ```

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use semver::{Prerelease, Version};

/// `major.minor[.patch][(-|.)label]`, searched anywhere in the input.
static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9]+)\.([0-9]+)(?:\.([0-9]+))?(?:[-.]([0-9A-Za-z][0-9A-Za-z.-]*))?")
        .expect("version pattern is a valid regex")
});

/// Totally ordered, comparable form of a version-bearing string.
///
/// `None` is the sentinel for input without a version; it compares below
/// every parsed key and equal to other sentinels.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VersionKey(Option<Version>);

impl VersionKey {
    /// Parses a tag, branch name or bare version string. Never fails.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);

        // Path-like references carry their version in the last segment.
        let tail = trimmed.rsplit('/').next().unwrap_or(trimmed);
        Self(find_version(tail).or_else(|| find_version(trimmed)))
    }

    /// The sentinel key that sorts below every real version.
    #[must_use]
    pub const fn lowest() -> Self {
        Self(None)
    }

    /// Returns `true` when no version could be extracted.
    #[must_use]
    pub const fn is_lowest(&self) -> bool {
        self.0.is_none()
    }

    /// Returns `true` when the key carries a pre-release label.
    #[must_use]
    pub fn is_prerelease(&self) -> bool {
        self.0.as_ref().is_some_and(|v| !v.pre.is_empty())
    }

    /// The underlying semantic version, if any.
    #[must_use]
    pub const fn as_semver(&self) -> Option<&Version> {
        self.0.as_ref()
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(version) => write!(f, "{version}"),
            None => f.write_str("unknown"),
        }
    }
}

/// Extracts `(major, minor)` for coarse compatibility checks.
///
/// Returns `None` when the input has no `major.minor` pair.
#[must_use]
pub fn major_minor(raw: &str) -> Option<(u64, u64)> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    VERSION_PATTERN.captures_iter(trimmed).find_map(|caps| {
        let major = caps.get(1)?.as_str().parse().ok()?;
        let minor = caps.get(2)?.as_str().parse().ok()?;
        Some((major, minor))
    })
}

fn find_version(input: &str) -> Option<Version> {
    VERSION_PATTERN.captures_iter(input).find_map(|caps| {
        let major = caps.get(1)?.as_str().parse().ok()?;
        let minor = caps.get(2)?.as_str().parse().ok()?;
        let patch = match caps.get(3) {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        };
        let mut version = Version::new(major, minor, patch);
        if let Some(label) = caps.get(4) {
            version.pre = normalize_label(label.as_str());
        }
        Some(version)
    })
}

/// Rewrites `beta-1`, `beta.01` and friends into dot-separated semver identifiers.
fn normalize_label(label: &str) -> Prerelease {
    let identifiers: Vec<String> = label
        .split(['.', '-'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            if part.bytes().all(|b| b.is_ascii_digit()) {
                part.trim_start_matches('0')
                    .parse::<u64>()
                    .map_or_else(|_| "0".to_string(), |n| n.to_string())
            } else {
                part.to_string()
            }
        })
        .collect();
    Prerelease::new(&identifiers.join(".")).unwrap_or(Prerelease::EMPTY)
}
