//! Discovery and crawling of Android manifests.
//!
//! A crawl has two halves. [`BatchSearchClient`] turns a code-search query
//! into a list of [`DocumentLocation`]s by speaking the batched search
//! protocol and mapping tree-wide paths onto repositories. The
//! [`ManifestCrawlOrchestrator`] then fetches every location concurrently
//! through the [`DocumentCache`] and a [`ResilientFetcher`], and feeds the
//! text to a [`ManifestParser`].
//!
//! Concurrent requests for the same document or the same repository ref are
//! coalesced by [`SingleFlight`]; a shared [`Throttler`] bounds the requests in
//! flight against the source host and pauses everyone while it is rate limited.

mod cache;
mod cache_lock;
mod fetch_outcome;
mod location;
mod orchestrator;
mod owner;
mod path_utils;
mod progress;
mod request_tracker;
mod resilient;
mod retry;
pub mod search;
mod single_flight;
pub mod source;
mod throttler;
mod version_ordering;

pub use cache::{CacheLayout, DocumentCache};
pub use cache_lock::{CacheLockGuard, acquire_cache_lock};
pub use fetch_outcome::FetchOutcome;
pub use location::DocumentLocation;
pub use orchestrator::{CrawlPacing, CrawlRecord, ManifestCrawlOrchestrator, ManifestParser};
pub use progress::{NoProgress, Progress};
pub use request_tracker::{RequestTracker, TopicStatus, TrackedTopic};
pub use resilient::{
    DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, ResilientFetcher, TRANSPORT_RETRY_ATTEMPTS, resilient_download, resilient_get,
};
pub use retry::RetryPolicy;
pub use search::BatchSearchClient;
pub use single_flight::SingleFlight;
pub use throttler::Throttler;
pub use version_ordering::VersionOrdering;

use crate::Result;
use core::time::Duration;

/// User agent sent with every request.
pub const USER_AGENT: &str = "aosp-harvest";

/// Build the HTTP client shared by every component of a run.
///
/// Idle connections kept per host match the request concurrency, so the
/// pool never holds more sockets than the throttler lets through.
/// `read_timeout` bounds each wait for more bytes rather than a whole
/// transfer, so large archive downloads are not cut off.
pub fn http_client(max_requests_per_host: usize, connect_timeout: Duration, read_timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .pool_max_idle_per_host(max_requests_per_host.max(1))
        .connect_timeout(connect_timeout)
        .read_timeout(read_timeout)
        .build()?)
}
