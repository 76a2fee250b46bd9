//! Update resolution, fetch, apply and rollback engine.
//!
//! ## Module Structure
//!
//! - [`version`] - Version string normalization and ordering
//! - [`transport`] - HTTP access with atomic downloads
//! - [`metadata`] - Release index client with a TTL cache
//! - [`channel`] - Channel to reference resolution
//! - [`paths`] - Installation layout and installed-state marker
//! - [`snapshot`] - Snapshot creation and restore
//! - [`archive`] - tar.gz extraction
//! - [`verify`] - SHA-256 checksum verification
//! - [`artifact`] - Archive download, extraction and shape validation
//! - [`compat`] - Runtime compatibility gate
//! - [`files`] - Single-file updates and core refresh
//! - [`apply`] - Applying an extracted artifact

pub mod apply;
pub mod archive;
pub mod artifact;
pub mod channel;
pub mod compat;
pub mod files;
pub mod metadata;
pub mod paths;
pub mod snapshot;
pub mod transport;
pub mod verify;
pub mod version;

pub use apply::{ApplyTarget, UpdateApplier};
pub use artifact::{ArtifactFetcher, ArtifactSource, ScratchArea};
pub use channel::{Channel, ChannelResolver, ReferenceKind, ReleaseReference};
pub use compat::CompatibilityGate;
pub use files::{FileKind, FileUpdater};
pub use metadata::{MetadataClient, Release};
pub use paths::InstallPaths;
pub use snapshot::SnapshotManager;
pub use transport::{HttpTransport, Transport};
pub use version::VersionKey;
