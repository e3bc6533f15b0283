//! Concurrent, cache-aware crawl over a set of discovered manifests.
//!
//! Every location becomes one task; all tasks run concurrently and are joined
//! in completion order. Each task reads through the [`DocumentCache`], skips
//! repositories that do not have the requested ref, fetches through a
//! [`ResilientFetcher`], and hands the text to a [`ManifestParser`]. Records
//! that share an identity collapse to the smallest of them and the survivors
//! are sorted at the end, so the output does not depend on completion order.

use super::cache::DocumentCache;
use super::location::DocumentLocation;
use super::owner::{application_id, build_descriptor_paths};
use super::request_tracker::{RequestTracker, TrackedTopic};
use super::resilient::ResilientFetcher;
use super::single_flight::SingleFlight;
use crate::Result;
use core::hash::Hash;
use core::time::Duration;
use futures::stream::{FuturesUnordered, StreamExt};
use ohno::{IntoAppError, bail};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};

const LOG_TARGET: &str = "     crawl";

/// A record produced by a [`ManifestParser`].
///
/// When several records share an identity, the smallest one under [`Ord`] is kept.
pub trait CrawlRecord: Ord {
    /// Content-derived identity; records with equal identity are duplicates.
    type Identity: Ord + Eq + Hash;

    fn identity(&self) -> Self::Identity;

    /// `(owner, name)`, the output order.
    fn sort_key(&self) -> (&str, &str);
}

/// Turns manifest text into records. Parsers never touch the network.
pub trait ManifestParser: Send + Sync {
    type Record: CrawlRecord;

    /// The owner declared inside the document itself, if any.
    fn declared_owner(&self, document: &str) -> Result<Option<String>>;

    /// Extract records, attributing them to `owner`.
    fn parse(&self, document: &str, owner: &str) -> Result<Vec<Self::Record>>;
}

/// Fixed pauses between the requests of a crawl.
#[derive(Debug, Clone, Copy)]
pub struct CrawlPacing {
    /// Pause after each network fetch, except for the last location of a repository.
    pub request_delay: Duration,
    /// Pause after skipping a location whose repository lacks the ref.
    pub absent_delay: Duration,
}

/// How a document was obtained.
#[derive(Debug)]
enum Loaded {
    Cached(String),
    Fetched(String),
    /// The remote has no such document.
    Absent,
    /// The repository does not have the requested ref.
    DeadReference,
}

#[derive(Debug)]
pub struct ManifestCrawlOrchestrator<P> {
    fetcher: ResilientFetcher,
    cache: Option<DocumentCache>,
    parser: P,
    pacing: CrawlPacing,
    documents: SingleFlight<Option<String>>,
    ref_checks: SingleFlight<bool>,
}

/// Keep the smallest record for every identity.
fn merge_into<R: CrawlRecord>(merged: &mut BTreeMap<R::Identity, R>, record: R) {
    match merged.entry(record.identity()) {
        Entry::Vacant(slot) => {
            let _ = slot.insert(record);
        }
        Entry::Occupied(mut slot) => {
            if record < *slot.get() {
                let _ = slot.insert(record);
            }
        }
    }
}

impl<P: ManifestParser> ManifestCrawlOrchestrator<P> {
    #[must_use]
    pub fn new(fetcher: ResilientFetcher, cache: Option<DocumentCache>, parser: P, pacing: CrawlPacing) -> Self {
        Self {
            fetcher,
            cache,
            parser,
            pacing,
            documents: SingleFlight::new(),
            ref_checks: SingleFlight::new(),
        }
    }

    /// Crawl `locations` at `reference` and return the merged records, sorted by `(owner, name)`.
    ///
    /// Any fatal error aborts the whole crawl; tasks still running are dropped.
    pub async fn crawl_all(
        &self,
        locations: &[DocumentLocation],
        reference: &str,
        use_cache: bool,
        tracker: &RequestTracker,
    ) -> Result<Vec<P::Record>> {
        let mut seen = HashSet::new();
        let unique: Vec<&DocumentLocation> = locations.iter().filter(|location| seen.insert(*location)).collect();

        let mut last_of_repository: HashMap<&str, &DocumentLocation> = HashMap::new();
        for location in &unique {
            let _ = last_of_repository.insert(location.repository(), location);
        }

        tracker.add_requests(TrackedTopic::Documents, unique.len() as u64);
        log::info!(target: LOG_TARGET, "Crawling {} documents at {reference}", unique.len());

        let mut pending: FuturesUnordered<_> = unique
            .iter()
            .map(|location| {
                let is_last = last_of_repository.get(location.repository()) == Some(location);
                self.crawl_location(location, reference, use_cache, is_last, tracker)
            })
            .collect();

        let mut merged = BTreeMap::new();
        while let Some(result) = pending.next().await {
            for record in result? {
                merge_into(&mut merged, record);
            }
        }

        let mut records: Vec<P::Record> = merged.into_values().collect();
        records.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()).then_with(|| a.cmp(b)));

        log::info!(target: LOG_TARGET, "Collected {} distinct records", records.len());
        Ok(records)
    }

    async fn crawl_location(
        &self,
        location: &DocumentLocation,
        reference: &str,
        use_cache: bool,
        is_last: bool,
        tracker: &RequestTracker,
    ) -> Result<Vec<P::Record>> {
        let result = self
            .crawl_location_core(location, reference, use_cache, is_last, tracker)
            .await
            .into_app_err_with(|| format!("crawling {location} at {reference}"));
        tracker.complete_request(TrackedTopic::Documents);
        result
    }

    async fn crawl_location_core(
        &self,
        location: &DocumentLocation,
        reference: &str,
        use_cache: bool,
        is_last: bool,
        tracker: &RequestTracker,
    ) -> Result<Vec<P::Record>> {
        let (text, fetched) = match self.load_document(location, reference, use_cache, tracker).await? {
            Loaded::Cached(text) => (text, false),
            Loaded::Fetched(text) => (text, true),
            Loaded::Absent => {
                self.pace(is_last).await;
                return Ok(Vec::new());
            }
            Loaded::DeadReference => {
                tokio::time::sleep(self.pacing.absent_delay).await;
                return Ok(Vec::new());
            }
        };

        let owner = match self.parser.declared_owner(&text)? {
            Some(owner) => owner,
            None => self.recover_owner(location, reference, use_cache, tracker).await?,
        };

        let records = self.parser.parse(&text, &owner)?;
        log::debug!(target: LOG_TARGET, "{location}: {} records for {owner}", records.len());

        if fetched {
            self.pace(is_last).await;
        }
        Ok(records)
    }

    async fn pace(&self, is_last: bool) {
        if !is_last {
            tokio::time::sleep(self.pacing.request_delay).await;
        }
    }

    /// Cache first, then the network.
    async fn load_document(
        &self,
        location: &DocumentLocation,
        reference: &str,
        use_cache: bool,
        tracker: &RequestTracker,
    ) -> Result<Loaded> {
        if use_cache
            && let Some(cache) = &self.cache
            && let Some(text) = cache.get(reference, location).await
        {
            return Ok(Loaded::Cached(text));
        }

        if !self.repository_exists(location.repository(), reference, tracker).await? {
            log::debug!(target: LOG_TARGET, "Skipping {location}: {} has no {reference}", location.repository());
            return Ok(Loaded::DeadReference);
        }

        let key = format!("{reference}:{location}");
        let text = self
            .documents
            .run(&key, || async {
                let text = self.fetcher.fetch(location, reference, tracker).await?;
                if let Some(text) = &text
                    && let Some(cache) = &self.cache
                    && let Err(e) = cache.put(reference, location, text).await
                {
                    log::warn!(target: LOG_TARGET, "Could not cache {location}: {e}");
                }
                Ok(text)
            })
            .await?;

        Ok(text.map_or(Loaded::Absent, Loaded::Fetched))
    }

    async fn repository_exists(&self, repository: &str, reference: &str, tracker: &RequestTracker) -> Result<bool> {
        let key = format!("{repository}@{reference}");
        self.ref_checks
            .run(&key, || async {
                tracker.add_requests(TrackedTopic::Repos, 1);
                let result = self.fetcher.repository_exists(repository, reference, tracker).await;
                tracker.complete_request(TrackedTopic::Repos);
                result
            })
            .await
    }

    /// Find the owner of a manifest that does not declare one.
    async fn recover_owner(
        &self,
        location: &DocumentLocation,
        reference: &str,
        use_cache: bool,
        tracker: &RequestTracker,
    ) -> Result<String> {
        for path in build_descriptor_paths(location.relative_path()) {
            let descriptor = location.sibling(path);
            let text = match self.load_document(&descriptor, reference, use_cache, tracker).await? {
                Loaded::Cached(text) | Loaded::Fetched(text) => text,
                Loaded::Absent | Loaded::DeadReference => continue,
            };

            if let Some(owner) = application_id(&text) {
                log::debug!(target: LOG_TARGET, "Owner of {location} is {owner}, from {descriptor}");
                return Ok(owner.to_owned());
            }
            log::debug!(target: LOG_TARGET, "{descriptor} has no applicationId");
        }

        bail!("could not resolve owner for manifest '{location}': no build file next to it declares an applicationId")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::cache::CacheLayout;
    use crate::crawl::progress::{NoProgress, Progress};
    use crate::crawl::retry::RetryPolicy;
    use crate::crawl::source::SourceClient;
    use crate::crawl::throttler::Throttler;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const REFERENCE: &str = "refs/heads/main";

    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
    struct Line {
        owner: String,
        name: String,
    }

    impl CrawlRecord for Line {
        type Identity = String;

        fn identity(&self) -> String {
            self.name.clone()
        }

        fn sort_key(&self) -> (&str, &str) {
            (&self.owner, &self.name)
        }
    }

    /// `owner=<id>` declares the owner; each `entry=<name>` line is a record.
    #[derive(Debug)]
    struct LineParser;

    impl ManifestParser for LineParser {
        type Record = Line;

        fn declared_owner(&self, document: &str) -> Result<Option<String>> {
            Ok(document.lines().find_map(|line| line.strip_prefix("owner=")).map(str::to_owned))
        }

        fn parse(&self, document: &str, owner: &str) -> Result<Vec<Line>> {
            if document.contains("garbage") {
                bail!("unparseable document");
            }
            Ok(document
                .lines()
                .filter_map(|line| line.strip_prefix("entry="))
                .map(|name| Line {
                    owner: owner.to_owned(),
                    name: name.to_owned(),
                })
                .collect())
        }
    }

    fn rendered(text: &str) -> String {
        let rows: String = text
            .lines()
            .enumerate()
            .map(|(i, line)| format!(r#"<tr><td class="FileContents-lineContents" id="{}">{line}</td></tr>"#, i + 1))
            .collect();
        format!(r#"<html><body><table class="FileContents">{rows}</table></body></html>"#)
    }

    fn tracker() -> RequestTracker {
        let progress: Arc<dyn Progress> = Arc::new(NoProgress);
        RequestTracker::new(&progress)
    }

    fn orchestrator(server: &MockServer, cache: Option<DocumentCache>, retry: RetryPolicy) -> ManifestCrawlOrchestrator<LineParser> {
        ManifestCrawlOrchestrator::new(
            ResilientFetcher::new(SourceClient::new(reqwest::Client::new(), server.uri()), Throttler::new(4), retry),
            cache,
            LineParser,
            CrawlPacing {
                request_delay: Duration::ZERO,
                absent_delay: Duration::ZERO,
            },
        )
    }

    fn quick_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(5), max_attempts)
    }

    async fn serve(server: &MockServer, file: &str, text: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/repo/+/{REFERENCE}{file}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(rendered(text)))
            .mount(server)
            .await;
    }

    async fn repository_exists(server: &MockServer) {
        Mock::given(method("HEAD"))
            .and(path(format!("/repo/+/{REFERENCE}")))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    fn at(file: &str) -> DocumentLocation {
        DocumentLocation::new("repo", file)
    }

    #[tokio::test]
    async fn records_are_merged_and_sorted() {
        let server = MockServer::start().await;
        repository_exists(&server).await;
        serve(&server, "/b/AndroidManifest.xml", "owner=com.b\nentry=zeta\nentry=alpha").await;
        serve(&server, "/a/AndroidManifest.xml", "owner=com.a\nentry=beta").await;

        let records = orchestrator(&server, None, quick_retry(3))
            .crawl_all(&[at("/b/AndroidManifest.xml"), at("/a/AndroidManifest.xml")], REFERENCE, false, &tracker())
            .await
            .unwrap();

        let keys: Vec<_> = records.iter().map(|r| (r.owner.as_str(), r.name.as_str())).collect();
        assert_eq!(keys, [("com.a", "beta"), ("com.b", "alpha"), ("com.b", "zeta")]);
    }

    #[tokio::test]
    async fn rate_limited_fetch_is_retried() {
        let server = MockServer::start().await;
        repository_exists(&server).await;
        Mock::given(method("GET"))
            .and(path(format!("/repo/+/{REFERENCE}/AndroidManifest.xml")))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        serve(&server, "/AndroidManifest.xml", "owner=com.a\nentry=one").await;

        let records = orchestrator(&server, None, quick_retry(3))
            .crawl_all(&[at("/AndroidManifest.xml")], REFERENCE, false, &tracker())
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let server = MockServer::start().await;
        repository_exists(&server).await;
        Mock::given(method("GET"))
            .and(path(format!("/repo/+/{REFERENCE}/AndroidManifest.xml")))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let err = orchestrator(&server, None, quick_retry(2))
            .crawl_all(&[at("/AndroidManifest.xml")], REFERENCE, false, &tracker())
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("still rate limited after 2 attempts"));
    }

    #[tokio::test]
    async fn fatal_status_aborts_the_crawl() {
        let server = MockServer::start().await;
        repository_exists(&server).await;
        serve(&server, "/ok/AndroidManifest.xml", "owner=com.a\nentry=one").await;
        Mock::given(method("GET"))
            .and(path(format!("/repo/+/{REFERENCE}/bad/AndroidManifest.xml")))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = orchestrator(&server, None, quick_retry(3))
            .crawl_all(&[at("/ok/AndroidManifest.xml"), at("/bad/AndroidManifest.xml")], REFERENCE, false, &tracker())
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("500"));
    }

    #[tokio::test]
    async fn parser_errors_name_the_document() {
        let server = MockServer::start().await;
        repository_exists(&server).await;
        serve(&server, "/AndroidManifest.xml", "owner=com.a\ngarbage").await;

        let err = orchestrator(&server, None, quick_retry(3))
            .crawl_all(&[at("/AndroidManifest.xml")], REFERENCE, false, &tracker())
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("crawling repo/AndroidManifest.xml"));
    }

    #[tokio::test]
    async fn dead_reference_contributes_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path(format!("/gone/+/{REFERENCE}")))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(500)).expect(0).mount(&server).await;

        let records = orchestrator(&server, None, quick_retry(3))
            .crawl_all(&[DocumentLocation::new("gone", "/AndroidManifest.xml")], REFERENCE, false, &tracker())
            .await
            .unwrap();

        assert!(records.is_empty());
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    async fn fetched_documents_are_cached_and_reused() {
        let server = MockServer::start().await;
        repository_exists(&server).await;
        Mock::given(method("GET"))
            .and(path(format!("/repo/+/{REFERENCE}/AndroidManifest.xml")))
            .respond_with(ResponseTemplate::new(200).set_body_string(rendered("owner=com.a\nentry=one")))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let cache = DocumentCache::new(tmp.path(), CacheLayout::Mirrored, false);
        let crawler = orchestrator(&server, Some(cache), quick_retry(3));

        let first = crawler.crawl_all(&[at("/AndroidManifest.xml")], REFERENCE, true, &tracker()).await.unwrap();
        let second = crawler.crawl_all(&[at("/AndroidManifest.xml")], REFERENCE, true, &tracker()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }

    #[tokio::test]
    async fn owner_comes_from_gradle_when_manifest_has_none() {
        let server = MockServer::start().await;
        repository_exists(&server).await;
        serve(&server, "/app/src/main/AndroidManifest.xml", "entry=settings").await;
        Mock::given(method("GET"))
            .and(path(format!("/repo/+/{REFERENCE}/app/build.gradle")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        serve(&server, "/app/build.gradle.kts", "android {\n  defaultConfig { applicationId = \"com.from.gradle\" }\n}").await;

        let records = orchestrator(&server, None, quick_retry(3))
            .crawl_all(&[at("/app/src/main/AndroidManifest.xml")], REFERENCE, false, &tracker())
            .await
            .unwrap();

        assert_eq!(
            records,
            [Line {
                owner: "com.from.gradle".to_owned(),
                name: "settings".to_owned()
            }]
        );
    }

    #[tokio::test]
    async fn unresolvable_owner_names_the_manifest() {
        let server = MockServer::start().await;
        repository_exists(&server).await;
        serve(&server, "/app/src/main/AndroidManifest.xml", "entry=settings").await;
        Mock::given(method("GET"))
            .and(path(format!("/repo/+/{REFERENCE}/app/build.gradle")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/repo/+/{REFERENCE}/app/build.gradle.kts")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = orchestrator(&server, None, quick_retry(3))
            .crawl_all(&[at("/app/src/main/AndroidManifest.xml")], REFERENCE, false, &tracker())
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("could not resolve owner for manifest 'repo/app/src/main/AndroidManifest.xml'"));
    }

    async fn serve_in(server: &MockServer, repository: &str, text: &str, delay: Duration) {
        Mock::given(method("HEAD"))
            .and(path(format!("/{repository}/+/{REFERENCE}")))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/{repository}/+/{REFERENCE}/AndroidManifest.xml")))
            .respond_with(ResponseTemplate::new(200).set_body_string(rendered(text)).set_delay(delay))
            .mount(server)
            .await;
    }

    async fn crawl_shared_name(first_delay: Duration, second_delay: Duration) -> Vec<Line> {
        let server = MockServer::start().await;
        serve_in(&server, "ra", "owner=com.a\nentry=shared", first_delay).await;
        serve_in(&server, "rb", "owner=com.b\nentry=shared", second_delay).await;

        let locations = [
            DocumentLocation::new("ra", "/AndroidManifest.xml"),
            DocumentLocation::new("rb", "/AndroidManifest.xml"),
        ];
        orchestrator(&server, None, quick_retry(3))
            .crawl_all(&locations, REFERENCE, false, &tracker())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn duplicate_identity_keeps_the_smallest_record() {
        let records = crawl_shared_name(Duration::ZERO, Duration::ZERO).await;
        assert_eq!(
            records,
            [Line {
                owner: "com.a".to_owned(),
                name: "shared".to_owned()
            }]
        );
    }

    #[tokio::test]
    async fn merge_does_not_depend_on_completion_order() {
        let a_first = crawl_shared_name(Duration::ZERO, Duration::from_millis(300)).await;
        let b_first = crawl_shared_name(Duration::from_millis(300), Duration::ZERO).await;

        assert_eq!(a_first, b_first);
        assert_eq!(a_first[0].owner, "com.a");
    }

    #[test]
    fn merge_prefers_the_smaller_record_either_way() {
        let a = Line {
            owner: "com.a".to_owned(),
            name: "x".to_owned(),
        };
        let b = Line {
            owner: "com.b".to_owned(),
            name: "x".to_owned(),
        };

        let mut forward = BTreeMap::new();
        merge_into(&mut forward, a.clone());
        merge_into(&mut forward, b.clone());

        let mut backward = BTreeMap::new();
        merge_into(&mut backward, b);
        merge_into(&mut backward, a.clone());

        assert_eq!(forward, backward);
        assert_eq!(forward.get("x"), Some(&a));
    }

    #[tokio::test]
    async fn duplicate_locations_are_fetched_once() {
        let server = MockServer::start().await;
        repository_exists(&server).await;
        Mock::given(method("GET"))
            .and(path(format!("/repo/+/{REFERENCE}/AndroidManifest.xml")))
            .respond_with(ResponseTemplate::new(200).set_body_string(rendered("owner=com.a\nentry=one")))
            .expect(1)
            .mount(&server)
            .await;

        let location = at("/AndroidManifest.xml");
        let records = orchestrator(&server, None, quick_retry(3))
            .crawl_all(&[location.clone(), location], REFERENCE, false, &tracker())
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
    }
}
