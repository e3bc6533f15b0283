//! Archive downloads from the package repository.

use super::index::RepositoryIndex;
use crate::Result;
use crate::crawl::{Progress, resilient_download};
use bytes::BytesMut;
use core::sync::atomic::{AtomicU64, Ordering};
use futures::StreamExt;
use ohno::{IntoAppError, bail};
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use url::Url;

const LOG_TARGET: &str = "  download";

/// Downloaded bytes are buffered up to this size between disk writes.
pub const DOWNLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;

const MB: u64 = 1024 * 1024;

impl RepositoryIndex {
    /// Where an archive named in the index is served from.
    pub fn archive_url(&self, name: &str) -> Result<Url> {
        if let Ok(url) = Url::parse(name) {
            return Ok(url);
        }
        let joined = format!("{}/{}", self.download_url(), name.trim_start_matches('/'));
        Url::parse(&joined).into_app_err_with(|| format!("invalid archive URL '{joined}'"))
    }

    /// Download `name` into `dest_dir` and return the local path.
    ///
    /// The body is written to `<file>.tmp` and renamed into place once the
    /// transfer completes, so a partial download never carries the final
    /// name. A transfer that fails part way is removed and restarted from
    /// scratch a few times. `dest_dir` must already exist.
    pub async fn download_archive(&self, name: &str, dest_dir: &Path) -> Result<PathBuf> {
        let is_dir = tokio::fs::metadata(dest_dir).await.is_ok_and(|metadata| metadata.is_dir());
        if !is_dir {
            bail!("destination directory '{}' does not exist", dest_dir.display());
        }

        let file_name = archive_file_name(name)?;
        let transfer = Transfer {
            client: self.client().clone(),
            url: self.archive_url(name)?,
            temp_path: dest_dir.join(format!("{file_name}.tmp")),
            downloaded: Arc::new(AtomicU64::new(0)),
        };
        let final_path = dest_dir.join(file_name);

        log::info!(target: LOG_TARGET, "Downloading {} to '{}'", transfer.url, final_path.display());

        let progress = Arc::clone(self.progress());
        let shown = file_name.to_owned();
        let attempt = move |transfer: Transfer| {
            let progress = Arc::clone(&progress);
            let shown = shown.clone();
            async move { transfer.attempt(&shown, &progress).await }
        };
        let outcome = resilient_download("archive_download", transfer.clone(), self.retry(), self.download_timeout(), attempt).await;

        let received = match outcome {
            Ok(Attempt::Complete(received)) => received,
            Ok(Attempt::Rejected(status)) => {
                transfer.discard().await;
                bail!("could not download '{}': HTTP {status}", transfer.url);
            }
            Err(e) => {
                // A timed-out attempt is dropped before it can clean up after itself.
                transfer.discard().await;
                return Err(e).into_app_err_with(|| format!("downloading '{}'", transfer.url));
            }
        };

        tokio::fs::rename(&transfer.temp_path, &final_path)
            .await
            .into_app_err_with(|| format!("moving '{}' into place", transfer.temp_path.display()))?;

        log::info!(target: LOG_TARGET, "Downloaded {file_name} ({} MB)", received / MB);
        self.progress().done();
        Ok(final_path)
    }

    /// Like [`Self::download_archive`], but reuses a previously downloaded file.
    pub async fn ensure_archive(&self, name: &str, dest_dir: &Path) -> Result<PathBuf> {
        let existing = dest_dir.join(archive_file_name(name)?);
        if tokio::fs::metadata(&existing).await.is_ok_and(|metadata| metadata.is_file()) {
            log::debug!(target: LOG_TARGET, "Reusing '{}'", existing.display());
            return Ok(existing);
        }
        self.download_archive(name, dest_dir).await
    }
}

/// How one download attempt ended without a transport failure.
#[derive(Debug, Clone, Copy)]
enum Attempt {
    /// Bytes written to the temporary file.
    Complete(u64),

    /// The server refused the request; retrying will not help.
    Rejected(StatusCode),
}

/// Everything one attempt needs, cloned into each retry.
#[derive(Debug, Clone)]
struct Transfer {
    client: reqwest::Client,
    url: Url,
    temp_path: PathBuf,
    downloaded: Arc<AtomicU64>,
}

impl Transfer {
    async fn attempt(&self, file_name: &str, progress: &Arc<dyn Progress>) -> Result<Attempt> {
        self.downloaded.store(0, Ordering::Relaxed);
        let result = self.stream_to_temp(file_name, progress).await;
        if result.is_err() {
            self.discard().await;
        }
        result
    }

    async fn stream_to_temp(&self, file_name: &str, progress: &Arc<dyn Progress>) -> Result<Attempt> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .into_app_err_with(|| format!("requesting '{}'", self.url))?;

        let status = response.status();
        if status.is_server_error() {
            bail!("server answered HTTP {status}");
        }
        if !status.is_success() {
            return Ok(Attempt::Rejected(status));
        }

        report_progress(progress, file_name, response.content_length(), &self.downloaded);

        let mut file = tokio::fs::File::create(&self.temp_path)
            .await
            .into_app_err_with(|| format!("creating '{}'", self.temp_path.display()))?;
        let mut buffer = BytesMut::with_capacity(DOWNLOAD_CHUNK_SIZE);
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.into_app_err("reading response body")?;
            let _ = self.downloaded.fetch_add(chunk.len() as u64, Ordering::Relaxed);
            buffer.extend_from_slice(&chunk);

            if buffer.len() >= DOWNLOAD_CHUNK_SIZE {
                file.write_all(&buffer)
                    .await
                    .into_app_err_with(|| format!("writing '{}'", self.temp_path.display()))?;
                buffer.clear();
            }
        }

        if !buffer.is_empty() {
            file.write_all(&buffer)
                .await
                .into_app_err_with(|| format!("writing '{}'", self.temp_path.display()))?;
        }
        file.flush().await?;

        Ok(Attempt::Complete(self.downloaded.load(Ordering::Relaxed)))
    }

    /// Remove whatever a failed attempt left in the temporary file.
    async fn discard(&self) {
        match tokio::fs::remove_file(&self.temp_path).await {
            Ok(()) => log::debug!(target: LOG_TARGET, "Removed partial download '{}'", self.temp_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(target: LOG_TARGET, "Could not remove '{}': {e}", self.temp_path.display()),
        }
    }
}

fn report_progress(progress: &Arc<dyn Progress>, file_name: &str, total: Option<u64>, downloaded: &Arc<AtomicU64>) {
    let downloaded = Arc::clone(downloaded);
    let file_name = file_name.to_owned();

    progress.set_phase("Downloading");
    if let Some(total) = total {
        progress.set_determinate(Box::new(move || {
            let current = downloaded.load(Ordering::Relaxed);
            (total, current, format!("{}/{} MB: {file_name}", current / MB, total / MB))
        }));
    } else {
        progress.set_indeterminate(Box::new(move || format!("{} MB: {file_name}", downloaded.load(Ordering::Relaxed) / MB)));
    }
}

/// The local file name for an archive: its last path segment.
fn archive_file_name(name: &str) -> Result<&str> {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    if file_name.is_empty() || file_name == "." || file_name == ".." {
        bail!("archive name '{name}' does not name a file");
    }
    Ok(file_name)
}
