//! SHA-256 verification of downloaded archives.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::errors::UpdateError;

/// Verifies that a file matches the expected SHA-256 checksum.
///
/// # Errors
///
/// Returns an error if the file cannot be read, or
/// [`UpdateError::ChecksumMismatch`] if the digest differs.
pub fn verify_checksum(file_path: &Path, expected: &str) -> Result<()> {
    let computed = compute_sha256(file_path)?;
    let expected = expected.trim().to_ascii_lowercase();

    if computed != expected {
        return Err(UpdateError::checksum_mismatch(expected, computed).into());
    }
    Ok(())
}

/// Computes the SHA-256 hash of a file as lowercase hex.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn compute_sha256(file_path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(file_path)
        .with_context(|| format!("Failed to open file for checksum: {}", file_path.display()))?;

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer).with_context(|| {
            format!("Failed to read file for checksum: {}", file_path.display())
        })?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
