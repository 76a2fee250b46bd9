//! HTTP access for metadata and artifacts.
//!
//! Everything the updater pulls from the network goes through [`Transport`]:
//! small JSON documents via [`Transport::get`] and archives or single files via
//! [`Transport::download`]. [`HttpTransport`] is the reqwest-backed
//! implementation; tests substitute an in-memory fake.
//!
//! ## Download Guarantees
//!
//! - Bytes are streamed into `<dest>.part` and renamed onto `dest` only after
//!   the whole body arrived, so a failed download never leaves a truncated or
//!   zero-byte file at the destination
//! - Up to 3 attempts with exponential backoff and jitter; 4xx answers are
//!   final and not retried
//! - Every request carries the configured timeout and User-Agent

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use rand::Rng;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::RemoteConfig;

/// Maximum number of download attempts.
const MAX_RETRIES: u32 = 3;

/// Base delay between retries in milliseconds.
const BASE_RETRY_DELAY_MS: u64 = 1000;

/// A response with a non-2xx status.
#[derive(Debug, Error)]
#[error("HTTP error {status}: {url}")]
pub struct StatusError {
    /// The status the server answered with.
    pub status: reqwest::StatusCode,
    /// The requested URL.
    pub url: String,
}

/// Network seam used by every remote-facing component.
pub trait Transport: Send + Sync {
    /// Fetches a URL and returns the full response body.
    ///
    /// Non-2xx statuses are errors.
    fn get(&self, url: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Downloads a URL to `dest`.
    ///
    /// On error `dest` is left exactly as it was before the call.
    fn download(&self, url: &str, dest: &Path) -> impl Future<Output = Result<()>> + Send;
}

/// Reqwest-backed transport sharing one connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Builds a client with the configured timeout and User-Agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(remote: &RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(remote.request_timeout())
            .user_agent(remote.user_agent.clone())
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to connect to {url}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StatusError {
                status,
                url: url.to_string(),
            }
            .into());
        }
        Ok(response)
    }

    async fn stream_to_file(&self, url: &str, dest: &Path) -> Result<u64> {
        let response = self.send(url).await?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create file: {}", dest.display()))?;

        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("Failed to read chunk from {url}"))?;
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write to {}", dest.display()))?;
            downloaded += chunk.len() as u64;
        }

        file.flush()
            .await
            .with_context(|| format!("Failed to flush {}", dest.display()))?;

        Ok(downloaded)
    }
}

impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url, "GET");
        let response = self.send(url).await?;
        let body = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read response body from {url}"))?;
        Ok(body.to_vec())
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let temp_path = partial_path(dest);

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = calculate_retry_delay(attempt);
                warn!(url, attempt = attempt + 1, delay_ms = delay, "retrying download");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            match self.stream_to_file(url, &temp_path).await {
                Ok(bytes) => {
                    tokio::fs::rename(&temp_path, dest).await.with_context(|| {
                        format!(
                            "Failed to rename {} to {}",
                            temp_path.display(),
                            dest.display()
                        )
                    })?;
                    debug!(url, size = %format_bytes(bytes), "download complete");
                    return Ok(());
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(&temp_path).await;
                    let permanent = e
                        .downcast_ref::<StatusError>()
                        .is_some_and(|s| s.status.is_client_error());
                    last_error = Some(e);
                    if permanent {
                        break;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Download failed after {MAX_RETRIES} attempts")))
    }
}

/// Sibling path a download is written to before it is renamed into place.
#[must_use]
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Formats bytes into a human-readable string (KB, MB, GB).
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    #[allow(clippy::cast_precision_loss)]
    let bytes_f = bytes as f64;

    if bytes_f >= GB {
        format!("{:.2} GB", bytes_f / GB)
    } else if bytes_f >= MB {
        format!("{:.2} MB", bytes_f / MB)
    } else if bytes_f >= KB {
        format!("{:.2} KB", bytes_f / KB)
    } else {
        format!("{bytes} B")
    }
}

/// Calculates the retry delay with exponential backoff and jitter.
///
/// The delay doubles with each attempt (1s, 2s, 4s) with +/- 25% jitter.
fn calculate_retry_delay(attempt: u32) -> u64 {
    let base_delay = BASE_RETRY_DELAY_MS * 2u64.pow(attempt);
    let jitter_range = base_delay / 4;
    let jitter = rand::rng().random_range(0..=jitter_range * 2);
    base_delay - jitter_range + jitter
}
