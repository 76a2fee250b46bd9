//! Error types for the lich5-update CLI.
//!
//! `UpdateError` names the failure kinds the update engine distinguishes.
//! Plumbing code returns `anyhow::Result` and raises these variants through it;
//! callers that need to react to a specific kind (exit codes, the "run
//! --revert" guidance) recover them with `downcast_ref`.
//!
//! Malformed version strings have no variant; parsing degrades to the lowest
//! ordering instead.

use std::path::PathBuf;
use thiserror::Error;

/// Consolidated error type for update, snapshot and revert operations.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Remote metadata or a file could not be fetched.
    #[error("network failure: {message}")]
    NetworkFailure {
        /// Description of what could not be fetched.
        message: String,
    },

    /// A channel could not be turned into a concrete reference.
    #[error("cannot resolve channel '{channel}': {reason}")]
    ChannelResolution {
        /// The requested channel.
        channel: String,
        /// Why every resolution strategy failed.
        reason: String,
    },

    /// The release archive could not be downloaded.
    #[error("download failed: {url}")]
    DownloadFailed {
        /// The archive URL.
        url: String,
        /// The underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The downloaded archive is not a readable gzip-compressed tarball.
    #[error("archive cannot be unpacked: {path}")]
    ArchiveUnreadable {
        /// The archive path.
        path: PathBuf,
        /// Decoder or tar error.
        message: String,
    },

    /// The archive unpacked to nothing.
    #[error("archive is empty: {path}")]
    ArchiveEmpty {
        /// The archive path.
        path: PathBuf,
    },

    /// Checksum verification failed.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The expected checksum.
        expected: String,
        /// The actual checksum.
        actual: String,
    },

    /// The extracted tree lacks the paths an installation needs.
    #[error("artifact does not look like a Lich installation: missing {missing}")]
    ArtifactStructureInvalid {
        /// The first required path that was not found.
        missing: String,
    },

    /// The artifact declares a runtime requirement the host does not meet.
    #[error("update requires Ruby {required}, but Ruby {running} is installed")]
    CompatibilityBlocked {
        /// Minimum runtime version declared by the artifact.
        required: String,
        /// Runtime version found on this host.
        running: String,
    },

    /// A step of the apply sequence failed after the installed tree was touched.
    #[error("update to {version} failed during {step}; the installation may be inconsistent")]
    ApplyPartialFailure {
        /// The version being applied.
        version: String,
        /// The apply step that failed.
        step: &'static str,
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Revert was requested but the backup root holds no snapshot.
    #[error("no prior version found in {backup_root}")]
    NoSnapshotAvailable {
        /// Directory that was searched.
        backup_root: PathBuf,
    },

    /// Another update, snapshot or revert holds the installation lock.
    #[error("another update operation is already running against {root}")]
    InstallBusy {
        /// Installation root.
        root: PathBuf,
    },

    /// Invalid request arguments.
    #[error("invalid arguments: {message}")]
    InvalidArguments {
        /// Description of what was invalid.
        message: String,
    },
}

impl UpdateError {
    /// Creates a new `NetworkFailure`.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkFailure {
            message: message.into(),
        }
    }

    /// Creates a new `ChannelResolution` error.
    #[must_use]
    pub fn channel_resolution(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ChannelResolution {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `DownloadFailed` error with a source error.
    #[must_use]
    pub fn download_failed(url: impl Into<String>, source: anyhow::Error) -> Self {
        Self::DownloadFailed {
            url: url.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a new `ArchiveUnreadable` error.
    #[must_use]
    pub fn archive_unreadable(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ArchiveUnreadable {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ArchiveEmpty` error.
    #[must_use]
    pub fn archive_empty(path: impl Into<PathBuf>) -> Self {
        Self::ArchiveEmpty { path: path.into() }
    }

    /// Creates a new `ChecksumMismatch` error.
    #[must_use]
    pub fn checksum_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::ChecksumMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a new `ArtifactStructureInvalid` error.
    #[must_use]
    pub fn structure_invalid(missing: impl Into<String>) -> Self {
        Self::ArtifactStructureInvalid {
            missing: missing.into(),
        }
    }

    /// Creates a new `CompatibilityBlocked` error.
    #[must_use]
    pub fn compatibility_blocked(required: impl Into<String>, running: impl Into<String>) -> Self {
        Self::CompatibilityBlocked {
            required: required.into(),
            running: running.into(),
        }
    }

    /// Creates a new `ApplyPartialFailure` error.
    #[must_use]
    pub fn apply_partial(
        version: impl Into<String>,
        step: &'static str,
        source: anyhow::Error,
    ) -> Self {
        Self::ApplyPartialFailure {
            version: version.into(),
            step,
            source: source.into(),
        }
    }

    /// Creates a new `NoSnapshotAvailable` error.
    #[must_use]
    pub fn no_snapshot(backup_root: impl Into<PathBuf>) -> Self {
        Self::NoSnapshotAvailable {
            backup_root: backup_root.into(),
        }
    }

    /// Creates a new `InstallBusy` error.
    #[must_use]
    pub fn install_busy(root: impl Into<PathBuf>) -> Self {
        Self::InstallBusy { root: root.into() }
    }

    /// Creates a new `InvalidArguments` error.
    #[must_use]
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            message: message.into(),
        }
    }

    /// Process exit code used when this error ends the program.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::InstallBusy { .. } => 2,
            Self::ApplyPartialFailure { .. } => 3,
            _ => 1,
        }
    }

    /// Whether the installed tree was left untouched by the failure.
    #[must_use]
    pub const fn is_before_mutation(&self) -> bool {
        !matches!(self, Self::ApplyPartialFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_resolution_names_channel_and_reason() {
        let err = UpdateError::channel_resolution("beta", "no prerelease newer than v5.14.3");
        assert_eq!(
            err.to_string(),
            "cannot resolve channel 'beta': no prerelease newer than v5.14.3"
        );
    }

    #[test]
    fn compatibility_blocked_names_both_versions() {
        let err = UpdateError::compatibility_blocked("3.2.0", "2.6.0");
        assert_eq!(
            err.to_string(),
            "update requires Ruby 3.2.0, but Ruby 2.6.0 is installed"
        );
    }

    #[test]
    fn checksum_mismatch_displays_both_values() {
        let err = UpdateError::checksum_mismatch("abc123", "def456");
        assert_eq!(
            err.to_string(),
            "checksum mismatch: expected abc123, got def456"
        );
    }

    #[test]
    fn no_snapshot_displays_backup_root() {
        let err = UpdateError::no_snapshot(PathBuf::from("/lich/backup"));
        assert_eq!(err.to_string(), "no prior version found in /lich/backup");
    }

    #[test]
    fn structure_invalid_displays_missing_path() {
        let err = UpdateError::structure_invalid("lich.rbw");
        assert!(err.to_string().contains("missing lich.rbw"));
    }

    #[test]
    fn apply_partial_failure_is_after_mutation() {
        let err = UpdateError::apply_partial("5.15.0", "library swap", anyhow::anyhow!("disk full"));
        assert!(!err.is_before_mutation());
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("library swap"));
    }

    #[test]
    fn busy_installation_has_distinct_exit_code() {
        let err = UpdateError::install_busy(PathBuf::from("/lich"));
        assert_eq!(err.exit_code(), 2);
        assert!(err.is_before_mutation());
    }

    #[test]
    fn invalid_arguments_displays_message() {
        let err = UpdateError::invalid_arguments("branch name cannot be empty");
        assert_eq!(
            err.to_string(),
            "invalid arguments: branch name cannot be empty"
        );
    }
}
