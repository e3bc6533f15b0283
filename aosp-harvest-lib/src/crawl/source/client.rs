//! Gitiles client
//!
//! Fetches single files and checks refs of repositories on a Gitiles host such
//! as `android.googlesource.com`. No retry logic lives here: callers decide
//! what to do with a [`FetchOutcome`].

use super::file_table::extract_file_text;
use crate::Result;
use crate::crawl::fetch_outcome::{FetchOutcome, classify_status, parse_retry_after};
use crate::crawl::location::DocumentLocation;
use ohno::IntoAppError;
use reqwest::StatusCode;

const LOG_TARGET: &str = "    source";

pub const SOURCE_BASE_URL: &str = "https://android.googlesource.com";

#[derive(Debug, Clone)]
pub struct SourceClient {
    client: reqwest::Client,
    base_url: String,
}

impl SourceClient {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// `{base}/{repository}[/+/{reference}[/{path}]]`
    fn build_url(&self, repository: &str, reference: Option<&str>, path: Option<&str>) -> String {
        fn segment(s: &str) -> &str {
            s.trim_start_matches(['/', ' '])
        }

        let mut url = format!("{}/{}", self.base_url, segment(repository));
        if let Some(reference) = reference {
            url.push_str("/+/");
            url.push_str(segment(reference));
            if let Some(path) = path {
                url.push('/');
                url.push_str(segment(path));
            }
        }
        url
    }

    /// Whether `repository` has `reference`.
    ///
    /// Sends a HEAD request. A 404 is [`FetchOutcome::Absent`] and a 429 is
    /// retryable; any other answer means the ref is there.
    pub async fn exists(&self, repository: &str, reference: &str) -> Result<FetchOutcome<()>> {
        let url = self.build_url(repository, Some(reference), None);
        let response = self
            .client
            .head(&url)
            .send()
            .await
            .into_app_err_with(|| format!("checking '{url}'"))?;

        let status = response.status();
        log::debug!(target: LOG_TARGET, "Checked {repository} at {reference}: {status}");
        Ok(match status {
            StatusCode::NOT_FOUND | StatusCode::TOO_MANY_REQUESTS => classify_status(status, parse_retry_after(response.headers())),
            _ => FetchOutcome::Found(()),
        })
    }

    /// Fetch one file and rebuild its text from the rendered view.
    pub async fn fetch_raw(&self, location: &DocumentLocation, reference: &str) -> Result<FetchOutcome<String>> {
        let url = self.build_url(location.repository(), Some(reference), Some(location.relative_path()));
        log::debug!(target: LOG_TARGET, "Fetching {url}");

        let response = self.client.get(&url).send().await.into_app_err_with(|| format!("requesting '{url}'"))?;

        let status = response.status();
        if !status.is_success() {
            log::debug!(target: LOG_TARGET, "Got {status} for {location} at {reference}");
            return Ok(classify_status(status, parse_retry_after(response.headers())));
        }

        let html = response.text().await.into_app_err_with(|| format!("reading response body from '{url}'"))?;
        let text = extract_file_text(&html).into_app_err_with(|| format!("reconstructing {location} at {reference}"))?;
        Ok(FetchOutcome::Found(text))
    }
}
