//! Tarball extraction for release and branch archives.
//!
//! Release archives wrap everything in one top-level folder
//! (`lich-5-5.14.3/lib/...`). That folder is stripped during extraction so the
//! installation shape always lands directly under the destination.

use std::fs::File;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use tar::{Archive, Entry, EntryType};

use crate::errors::UpdateError;

/// Extracts a gzip-compressed tarball into `dest_dir`.
///
/// Creates the destination directory if it does not exist. If all archive
/// entries share a common root folder it is stripped (e.g.
/// `lich-5-5.14.3/lib/version.rb` becomes `lib/version.rb`). Pax header
/// entries are skipped.
///
/// # Errors
///
/// - [`UpdateError::ArchiveUnreadable`] if the file is not a readable
///   gzip-compressed tarball, or an entry escapes the destination
/// - [`UpdateError::ArchiveEmpty`] if nothing was extracted
/// - a plain I/O error if the destination cannot be written
pub fn extract_tar_gz(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create directory: {}", dest_dir.display()))?;

    let strip_prefix = find_common_root_folder(archive_path)?;

    let mut archive = open(archive_path)?;
    let entries = archive
        .entries()
        .map_err(|e| UpdateError::archive_unreadable(archive_path, e.to_string()))?;

    let mut extracted = 0usize;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| UpdateError::archive_unreadable(archive_path, e.to_string()))?;
        if is_pax_header(&entry) {
            continue;
        }

        let entry_path = entry_path(&entry, archive_path)?;

        let relative_path = if let Some(ref prefix) = strip_prefix {
            match entry_path.strip_prefix(prefix) {
                Ok(p) if p.as_os_str().is_empty() => continue,
                Ok(p) => p.to_path_buf(),
                Err(_) => entry_path.clone(),
            }
        } else {
            entry_path.clone()
        };

        let output_path = dest_dir.join(&relative_path);

        if entry.header().entry_type().is_dir() {
            std::fs::create_dir_all(&output_path).with_context(|| {
                format!("Failed to create directory: {}", output_path.display())
            })?;
        } else {
            if let Some(parent) = output_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }

            entry
                .unpack(&output_path)
                .map_err(|e| UpdateError::archive_unreadable(archive_path, e.to_string()))?;
        }
        extracted += 1;
    }

    if extracted == 0 {
        return Err(UpdateError::archive_empty(archive_path).into());
    }
    Ok(())
}

fn open(archive_path: &Path) -> Result<Archive<GzDecoder<File>>> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?;
    Ok(Archive::new(GzDecoder::new(file)))
}

fn is_pax_header<R: std::io::Read>(entry: &Entry<'_, R>) -> bool {
    matches!(
        entry.header().entry_type(),
        EntryType::XGlobalHeader | EntryType::XHeader
    )
}

/// Entry path, rejecting absolute paths and `..` components.
fn entry_path<R: std::io::Read>(entry: &Entry<'_, R>, archive_path: &Path) -> Result<PathBuf> {
    let path = entry
        .path()
        .map_err(|e| UpdateError::archive_unreadable(archive_path, e.to_string()))?
        .into_owned();

    if path.is_absolute() || path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(UpdateError::archive_unreadable(
            archive_path,
            format!(
                "refusing to extract path with parent directory or absolute reference: {}",
                path.display()
            ),
        )
        .into());
    }
    Ok(path)
}

/// Finds a common root folder shared by all archive entries.
///
/// Returns `Some(prefix)` only if every entry starts with the same folder and
/// at least one entry is nested below it, so a flat archive of files is never
/// stripped.
fn find_common_root_folder(archive_path: &Path) -> Result<Option<PathBuf>> {
    let mut archive = open(archive_path)?;

    let mut common_root: Option<PathBuf> = None;
    let mut has_nested_entries = false;

    for entry in archive
        .entries()
        .map_err(|e| UpdateError::archive_unreadable(archive_path, e.to_string()))?
    {
        let entry =
            entry.map_err(|e| UpdateError::archive_unreadable(archive_path, e.to_string()))?;
        if is_pax_header(&entry) {
            continue;
        }

        let path = entry_path(&entry, archive_path)?;

        if path.components().count() > 1 {
            has_nested_entries = true;
        }

        let Some(first_component) = path.components().next() else {
            continue;
        };
        let root = PathBuf::from(first_component.as_os_str());

        match &common_root {
            None => common_root = Some(root),
            Some(existing) if existing != &root => return Ok(None),
            Some(_) => {}
        }
    }

    if has_nested_entries {
        Ok(common_root)
    } else {
        Ok(None)
    }
}
