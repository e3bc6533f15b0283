//! End-to-end crawl over a mocked code search endpoint and Gitiles host.
//!
//! The search is answered in two pages, the project manifest maps the hits to
//! three repositories, and the manifests themselves are served as rendered
//! Gitiles pages.

use aosp_harvest_lib::crawl::search::{QueryConfig, SEARCH_REFERER, SearchSettings};
use aosp_harvest_lib::crawl::source::SourceClient;
use aosp_harvest_lib::crawl::{
    BatchSearchClient, CacheLayout, CrawlPacing, DocumentCache, DocumentLocation, ManifestCrawlOrchestrator, NoProgress, Progress,
    RequestTracker, ResilientFetcher, RetryPolicy, Throttler, TrackedTopic,
};
use aosp_harvest_lib::records::{ProviderManifestParser, permission_providers};
use core::time::Duration;
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REFERENCE: &str = "refs/heads/main";

const PROJECT_MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<manifest>
  <remote name="aosp" fetch=".." />
  <project path="packages/providers/ContactsProvider" name="platform/packages/providers/ContactsProvider" groups="pdk-cw-fs" />
  <project path="packages/apps/Contacts" name="platform/packages/apps/Contacts" />
  <project name="platform/frameworks/gone" />
</manifest>"#;

const CONTACTS_PROVIDER_MANIFEST: &str = r#"<manifest xmlns:android="http://schemas.android.com/apk/res/android"
        package="com.android.providers.contacts">
    <application android:label="Contacts Storage">
        <provider android:name=".ContactsProvider2"
                android:authorities="contacts;com.android.contacts"
                android:exported="true"
                android:readPermission="android.permission.READ_CONTACTS"
                android:writePermission="android.permission.WRITE_CONTACTS" />
    </application>
</manifest>"#;

const CONTACTS_APP_MANIFEST: &str = r#"<manifest xmlns:android="http://schemas.android.com/apk/res/android"
        package="com.android.contacts">
    <application>
        <provider android:name="com.android.contacts.ShadowProvider"
                android:authorities="com.android.contacts;contacts"
                android:exported="true"
                android:permission="android.permission.READ_CONTACTS" />
        <provider android:name=".FileProvider"
                android:authorities="com.android.contacts.files"
                android:exported="false"
                android:grantUriPermissions="true">
            <grant-uri-permission android:pathPrefix="/shared/" />
        </provider>
        <provider android:name=".Private"
                android:authorities="com.android.contacts.private" />
    </application>
</manifest>"#;

/// Gitiles' line-numbered view of `text`.
fn rendered(text: &str) -> String {
    let rows: String = text
        .lines()
        .enumerate()
        .map(|(i, line)| {
            let escaped = line.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;");
            format!(r#"<tr><td class="FileContents-lineContents" id="{}">{escaped}</td></tr>"#, i + 1)
        })
        .collect();
    format!(r#"<!DOCTYPE html><html><body><table class="FileContents">{rows}</table></body></html>"#)
}

/// A single-part batch response wrapping `json` with the given embedded status line.
fn batch_response(status_line: &str, json: &str) -> String {
    format!(
        "--batch_resp\r\n\
         Content-Type: application/http\r\n\
         Content-ID: <response-batch123+gapiRequest@googleapis.com>\r\n\
         \r\n\
         {status_line}\r\n\
         Content-Type: application/json; charset=UTF-8\r\n\
         \r\n\
         {json}\r\n\
         --batch_resp--\r\n"
    )
}

fn search_hit(path: &str) -> String {
    format!(r#"{{"fileSearchResult":{{"fileSpec":{{"path":"{path}"}}}}}}"#)
}

fn tracker() -> RequestTracker {
    let progress: Arc<dyn Progress> = Arc::new(NoProgress);
    RequestTracker::new(&progress)
}

fn fetcher(server: &MockServer, http: reqwest::Client) -> ResilientFetcher {
    ResilientFetcher::new(
        SourceClient::new(http, server.uri()),
        Throttler::new(2),
        RetryPolicy::new(Duration::from_millis(1), 2),
    )
}

fn search_client(server: &MockServer) -> BatchSearchClient {
    let http = reqwest::Client::new();
    BatchSearchClient::new(
        http.clone(),
        SearchSettings {
            base_url: server.uri(),
            api_key: "KEY".to_owned(),
            referer: SEARCH_REFERER.to_owned(),
            page_delay: Duration::ZERO,
            manifest_reference: REFERENCE.to_owned(),
        },
        fetcher(server, http),
    )
}

async fn mount_project_manifest(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/platform/manifest/+/refs/heads/main/default.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rendered(PROJECT_MANIFEST)))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_document(server: &MockServer, repository: &str, text: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/{repository}/+/{REFERENCE}/AndroidManifest.xml")))
        .respond_with(ResponseTemplate::new(200).set_body_string(rendered(text)))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn search_pages_until_the_token_runs_out() {
    let server = MockServer::start().await;
    mount_project_manifest(&server).await;

    let first = format!(
        r#"{{"searchResults":[{},{}],"nextPageToken":"p2","estimatedResultCount":"3"}}"#,
        search_hit("packages/providers/ContactsProvider/AndroidManifest.xml"),
        search_hit("packages/apps/Contacts/AndroidManifest.xml")
    );
    let second = format!(
        r#"{{"searchResults":[{}],"estimatedResultCount":3}}"#,
        search_hit("platform/frameworks/gone/AndroidManifest.xml")
    );

    Mock::given(method("POST"))
        .and(path("/batch"))
        .and(body_string_contains(r#""pageToken":"p2""#))
        .respond_with(ResponseTemplate::new(200).set_body_string(batch_response("HTTP/1.1 200 OK", &second)))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/batch"))
        .and(body_string_contains("key=KEY"))
        .respond_with(ResponseTemplate::new(200).set_body_string(batch_response("HTTP/1.1 200 OK", &first)))
        .expect(1)
        .mount(&server)
        .await;

    let tracker = tracker();
    let locations = search_client(&server)
        .query_all(&QueryConfig::new("content-provider", "android", "platform/superproject/main"), &tracker)
        .await
        .unwrap();

    assert_eq!(
        locations,
        vec![
            DocumentLocation::new("platform/packages/providers/ContactsProvider", "/AndroidManifest.xml"),
            DocumentLocation::new("platform/packages/apps/Contacts", "/AndroidManifest.xml"),
            DocumentLocation::new("platform/frameworks/gone", "/AndroidManifest.xml"),
        ]
    );
    assert_eq!(tracker.counts(TrackedTopic::Results), (3, 3));
}

#[tokio::test]
async fn embedded_error_status_fails_the_search() {
    let server = MockServer::start().await;
    mount_project_manifest(&server).await;

    Mock::given(method("POST"))
        .and(path("/batch"))
        .respond_with(ResponseTemplate::new(200).set_body_string(batch_response(
            "HTTP/1.1 403 Forbidden",
            r#"{"error":{"code":403,"message":"API key not valid"}}"#,
        )))
        .mount(&server)
        .await;

    let err = search_client(&server)
        .query_all(&QueryConfig::new("content-provider", "android", "platform/superproject/main"), &tracker())
        .await
        .unwrap_err();

    let message = format!("{err:#}");
    assert!(message.contains("search request failed"), "{message}");
    assert!(message.contains("API key not valid"), "{message}");
}

#[tokio::test]
async fn crawl_merges_providers_across_repositories() {
    let server = MockServer::start().await;
    let cache_dir = tempfile::tempdir().unwrap();

    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    mount_document(&server, "platform/packages/providers/ContactsProvider", CONTACTS_PROVIDER_MANIFEST).await;
    mount_document(&server, "platform/packages/apps/Contacts", CONTACTS_APP_MANIFEST).await;
    Mock::given(method("GET"))
        .and(path("/platform/frameworks/gone/+/refs/heads/main/AndroidManifest.xml"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = ManifestCrawlOrchestrator::new(
        fetcher(&server, reqwest::Client::new()),
        Some(DocumentCache::new(cache_dir.path(), CacheLayout::Mirrored, false)),
        ProviderManifestParser,
        CrawlPacing {
            request_delay: Duration::ZERO,
            absent_delay: Duration::ZERO,
        },
    );

    let locations = [
        DocumentLocation::new("platform/packages/providers/ContactsProvider", "/AndroidManifest.xml"),
        DocumentLocation::new("platform/packages/apps/Contacts", "/AndroidManifest.xml"),
        DocumentLocation::new("platform/frameworks/gone", "/AndroidManifest.xml"),
        DocumentLocation::new("platform/packages/apps/Contacts", "/AndroidManifest.xml"),
    ];

    let tracker = tracker();
    let providers = orchestrator.crawl_all(&locations, REFERENCE, true, &tracker).await.unwrap();

    // The two declarations of the contacts authorities collapse into one
    // record, and the smaller one survives whichever fetch finished first.
    let names: Vec<&str> = providers.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(providers.len(), 2, "{names:?}");

    let shared = providers.iter().find(|p| p.authorities.len() == 2).unwrap();
    assert_eq!(shared.package, "com.android.contacts");
    assert_eq!(shared.name, "com.android.contacts.ShadowProvider");
    assert!(shared.authorities.contains(&"contacts".to_owned()));
    assert!(shared.authorities.contains(&"com.android.contacts".to_owned()));
    assert_eq!(shared.read_permission.as_deref(), Some("android.permission.READ_CONTACTS"));

    let files = providers.iter().find(|p| p.name == "com.android.contacts.FileProvider").unwrap();
    assert!(!files.exported);
    assert!(files.has_uri_permission);
    assert_eq!(files.grant_uri_permissions.len(), 1);
    assert_eq!(files.grant_uri_permissions[0].kind, "pathPrefix");
    assert_eq!(files.grant_uri_permissions[0].path, "/shared/");

    let keys: Vec<(&str, &str)> = providers.iter().map(|p| (p.package.as_str(), p.name.as_str())).collect();
    let mut sorted = keys.clone();
    sorted.sort_unstable();
    assert_eq!(keys, sorted);

    let guarded = permission_providers(&providers);
    assert_eq!(guarded.len(), 1);
    assert_eq!(guarded[0].authorities.len(), 2);

    assert_eq!(tracker.counts(TrackedTopic::Documents), (3, 3));

    // Found documents were mirrored into the cache. The absent one was not.
    let cache = DocumentCache::new(cache_dir.path(), CacheLayout::Mirrored, false);
    assert!(cache.get(REFERENCE, &locations[1]).await.is_some());
    assert!(cache.get(REFERENCE, &locations[2]).await.is_none());
}
