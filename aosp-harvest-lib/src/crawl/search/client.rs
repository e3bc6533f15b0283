//! Paged client for the code search batch endpoint.

use super::batch_codec::{decode_response, encode_request, new_boundary};
use super::project_manifest::{MANIFEST_PATH, MANIFEST_REPOSITORY, ProjectMappings};
use super::query::{QueryConfig, QueryPage};
use crate::Result;
use crate::crawl::location::DocumentLocation;
use crate::crawl::request_tracker::{RequestTracker, TrackedTopic};
use crate::crawl::resilient::ResilientFetcher;
use core::time::Duration;
use ohno::{IntoAppError, bail};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{CONTENT_TYPE, REFERER};
use std::sync::Arc;
use tokio::sync::OnceCell;

const LOG_TARGET: &str = "    search";

pub const SEARCH_BASE_URL: &str = "https://grimoireoss-pa.clients6.google.com";
pub const SEARCH_REFERER: &str = "https://cs.android.com/";

/// Endpoint and pacing settings for [`BatchSearchClient`].
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub base_url: String,
    pub api_key: String,
    pub referer: String,
    /// Pause between consecutive pages of one query.
    pub page_delay: Duration,
    /// Ref of the project manifest used to map result paths to repositories.
    pub manifest_reference: String,
}

#[derive(Debug)]
pub struct BatchSearchClient {
    client: reqwest::Client,
    settings: SearchSettings,
    fetcher: ResilientFetcher,
    mappings: OnceCell<Arc<ProjectMappings>>,
}

impl BatchSearchClient {
    #[must_use]
    pub fn new(client: reqwest::Client, settings: SearchSettings, fetcher: ResilientFetcher) -> Self {
        Self {
            client,
            settings,
            fetcher,
            mappings: OnceCell::new(),
        }
    }

    /// The project mappings, fetched on first use and kept for the life of the client.
    ///
    /// The manifest is fetched like any crawled document: behind the shared
    /// throttler and with the same retry policy.
    pub async fn project_mappings(&self, tracker: &RequestTracker) -> Result<Arc<ProjectMappings>> {
        self.mappings
            .get_or_try_init(|| self.load_project_mappings(tracker))
            .await
            .map(Arc::clone)
    }

    async fn load_project_mappings(&self, tracker: &RequestTracker) -> Result<Arc<ProjectMappings>> {
        let location = DocumentLocation::new(MANIFEST_REPOSITORY, MANIFEST_PATH);
        let reference = self.settings.manifest_reference.as_str();

        let Some(text) = self.fetcher.fetch(&location, reference, tracker).await? else {
            bail!("project manifest {location} does not exist at {reference}");
        };

        let mappings = ProjectMappings::parse(&text).into_app_err_with(|| format!("parsing project manifest {location}"))?;
        log::info!(target: LOG_TARGET, "Loaded {} project mappings from {location}", mappings.len());
        Ok(Arc::new(mappings))
    }

    fn batch_url(&self, boundary: &str) -> String {
        let content_type = format!("multipart/mixed; boundary={boundary}");
        format!(
            "{}/batch?%24ct={}",
            self.settings.base_url.trim_end_matches('/'),
            utf8_percent_encode(&content_type, NON_ALPHANUMERIC)
        )
    }

    /// Issue one page request.
    pub async fn query_page(&self, config: &QueryConfig) -> Result<QueryPage> {
        let boundary = new_boundary();
        let payload = serde_json::to_string(config).into_app_err("serializing search query")?;
        let body = encode_request(&boundary, &self.settings.api_key, &payload);

        let response = self
            .client
            .post(self.batch_url(&boundary))
            .header(CONTENT_TYPE, "text/plain")
            .header(REFERER, self.settings.referer.as_str())
            .body(body)
            .send()
            .await
            .into_app_err("sending search request")?;

        let status = response.status();
        let text = response.text().await.into_app_err("reading search response")?;
        if !status.is_success() {
            bail!("search endpoint answered {status}: {}", text.trim());
        }

        decode_response(&text)
    }

    /// Run a query to completion and map every hit to a location.
    ///
    /// Pages are fetched strictly one after another with a fixed pause in
    /// between. The result order follows the service's order.
    pub async fn query_all(&self, config: &QueryConfig, tracker: &RequestTracker) -> Result<Vec<DocumentLocation>> {
        let mappings = self.project_mappings(tracker).await?;
        let mut config = config.clone();
        let mut locations = Vec::new();
        let mut pages = 0u32;

        loop {
            if pages > 0 {
                tokio::time::sleep(self.settings.page_delay).await;
            }

            let page = self
                .query_page(&config)
                .await
                .into_app_err_with(|| format!("searching for '{}' (page {})", config.query_string(), pages + 1))?;
            pages += 1;

            tracker.set_expected(TrackedTopic::Results, page.estimated_total());

            let before = locations.len();
            for path in page.paths() {
                locations.push(mappings.resolve(path)?);
            }
            tracker.complete_requests(TrackedTopic::Results, (locations.len() - before) as u64);

            log::debug!(
                target: LOG_TARGET,
                "Page {pages} of '{}': {} results, about {} in total",
                config.query_string(),
                locations.len() - before,
                page.estimated_total()
            );

            match page.next_page_token() {
                Some(token) => config = config.with_page_token(token),
                None => break,
            }
        }

        log::info!(target: LOG_TARGET, "Search '{}' found {} files in {pages} pages", config.query_string(), locations.len());
        Ok(locations)
    }
}
