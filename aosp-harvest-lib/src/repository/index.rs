//! The SDK package index published at `dl.google.com`.
//!
//! The index is one large XML document listing every installable package with
//! its revision, release channel and per-host archives. It is fetched once per
//! [`RepositoryIndex`] and kept in memory afterwards.

use super::host_os::HostOs;
use super::package::{ArchiveVariant, PackageDescriptor, Revision};
use crate::Result;
use crate::crawl::{DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, NoProgress, Progress, RetryPolicy, VersionOrdering, resilient_get};
use core::cmp::Ordering;
use core::time::Duration;
use ohno::{IntoAppError, app_err, bail};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

const LOG_TARGET: &str = "repository";

pub const REPOSITORY_INDEX_URL: &str = "https://dl.google.com/android/repository/repository2-3.xml";
pub const REPOSITORY_DOWNLOAD_URL: &str = "https://dl.google.com/android/repository";

/// The stable release channel.
pub const DEFAULT_CHANNEL: &str = "channel-0";

/// Parsed contents of the index.
#[derive(Debug, Clone, Default)]
pub struct IndexDocument {
    channels: BTreeMap<String, String>,
    packages: Vec<PackageDescriptor>,
}

impl IndexDocument {
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<String> = Vec::new();
        let mut text = String::new();
        let mut document = Self::default();
        let mut package: Option<PackageDescriptor> = None;
        let mut archive: Option<ArchiveVariant> = None;
        let mut channel_id: Option<String> = None;

        loop {
            match reader.read_event().into_app_err("reading repository index")? {
                Event::Start(element) => {
                    let name = local_name(&element);
                    match name.as_str() {
                        "remotePackage" => {
                            let path = attribute(&element, b"path")?.ok_or_else(|| app_err!("remotePackage without a path"))?;
                            package = Some(PackageDescriptor {
                                path,
                                revision: Revision::default(),
                                display_name: None,
                                channel: None,
                                archives: Vec::new(),
                            });
                        }
                        "archive" if package.is_some() => {
                            archive = Some(ArchiveVariant {
                                url: String::new(),
                                host_os: None,
                            });
                        }
                        "channel" if stack.len() == 1 => channel_id = attribute(&element, b"id")?,
                        "channelRef" if is_under(&stack, &["remotePackage"]) => {
                            if let Some(package) = package.as_mut() {
                                package.channel = attribute(&element, b"ref")?;
                            }
                        }
                        _ => {}
                    }
                    stack.push(name);
                    text.clear();
                }
                Event::Empty(element) => {
                    if local_name(&element) == "channelRef"
                        && is_under(&stack, &["remotePackage"])
                        && let Some(package) = package.as_mut()
                    {
                        package.channel = attribute(&element, b"ref")?;
                    }
                }
                Event::Text(content) => text.push_str(&content.unescape()?),
                Event::CData(content) => text.push_str(&String::from_utf8_lossy(&content)),
                Event::End(_) => {
                    let name = stack.pop().unwrap_or_default();
                    let value = text.trim();

                    match name.as_str() {
                        "major" | "minor" | "micro" if is_under(&stack, &["remotePackage", "revision"]) => {
                            if let Some(package) = package.as_mut() {
                                let number = value
                                    .parse::<u32>()
                                    .into_app_err_with(|| format!("invalid revision component '{value}' in {}", package.path))?;
                                match name.as_str() {
                                    "major" => package.revision.major = number,
                                    "minor" => package.revision.minor = number,
                                    _ => package.revision.micro = number,
                                }
                            }
                        }
                        "display-name" if is_under(&stack, &["remotePackage"]) => {
                            if let Some(package) = package.as_mut() {
                                package.display_name = Some(value.to_owned());
                            }
                        }
                        "url" if is_under(&stack, &["archive", "complete"]) => {
                            if let Some(archive) = archive.as_mut() {
                                archive.url = value.to_owned();
                            }
                        }
                        "host-os" if is_under(&stack, &["archive"]) => {
                            if let Some(archive) = archive.as_mut() {
                                archive.host_os =
                                    Some(value.parse::<HostOs>().map_err(|e| app_err!("unknown host-os '{value}': {e:?}"))?);
                            }
                        }
                        "archive" => {
                            if let (Some(package), Some(archive)) = (package.as_mut(), archive.take())
                                && !archive.url.is_empty()
                            {
                                package.archives.push(archive);
                            }
                        }
                        "remotePackage" => document.packages.extend(package.take()),
                        "channel" if stack.len() == 1 => {
                            if let Some(id) = channel_id.take() {
                                let _ = document.channels.insert(id, value.to_owned());
                            }
                        }
                        _ => {}
                    }
                    text.clear();
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if document.packages.is_empty() {
            bail!("repository index does not list any packages");
        }

        Ok(document)
    }

    #[must_use]
    pub const fn channels(&self) -> &BTreeMap<String, String> {
        &self.channels
    }

    #[must_use]
    pub fn packages(&self) -> &[PackageDescriptor] {
        &self.packages
    }
}

/// Whether the innermost open elements are `parents`, outermost first.
fn is_under(stack: &[String], parents: &[&str]) -> bool {
    stack.len() >= parents.len() && stack.iter().rev().zip(parents.iter().rev()).all(|(open, parent)| open == parent)
}

fn local_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attribute in element.attributes() {
        let attribute = attribute?;
        if attribute.key.local_name().as_ref() == name {
            return Ok(Some(attribute.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Lazily fetched view over the package index.
pub struct RepositoryIndex {
    client: reqwest::Client,
    index_url: String,
    download_url: String,
    ordering: VersionOrdering,
    document: OnceCell<Arc<IndexDocument>>,
    progress: Arc<dyn Progress>,
    retry: RetryPolicy,
    request_timeout: Duration,
    download_timeout: Duration,
}

impl core::fmt::Debug for RepositoryIndex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RepositoryIndex")
            .field("index_url", &self.index_url)
            .field("download_url", &self.download_url)
            .field("loaded", &self.document.initialized())
            .finish_non_exhaustive()
    }
}

impl RepositoryIndex {
    #[must_use]
    pub fn new(client: reqwest::Client, index_url: impl Into<String>, download_url: impl Into<String>) -> Self {
        Self {
            client,
            index_url: index_url.into(),
            download_url: download_url.into().trim_end_matches('/').to_owned(),
            ordering: VersionOrdering::new(),
            document: OnceCell::new(),
            progress: Arc::new(NoProgress),
            retry: RetryPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }

    /// Back off under `retry`, allowing each index request `request_timeout`
    /// and each archive download attempt `download_timeout`.
    #[must_use]
    pub fn with_retry(self, retry: RetryPolicy, request_timeout: Duration, download_timeout: Duration) -> Self {
        Self {
            retry,
            request_timeout,
            download_timeout,
            ..self
        }
    }

    /// Report download progress to `progress`.
    #[must_use]
    pub fn with_progress(self, progress: Arc<dyn Progress>) -> Self {
        Self { progress, ..self }
    }

    /// Use an already parsed index instead of fetching one.
    #[must_use]
    pub fn with_document(self, document: IndexDocument) -> Self {
        Self {
            document: OnceCell::new_with(Some(Arc::new(document))),
            ..self
        }
    }

    pub(super) const fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(super) fn download_url(&self) -> &str {
        &self.download_url
    }

    pub(super) fn progress(&self) -> &Arc<dyn Progress> {
        &self.progress
    }

    pub(super) const fn retry(&self) -> RetryPolicy {
        self.retry
    }

    pub(super) const fn download_timeout(&self) -> Duration {
        self.download_timeout
    }

    /// The index, fetched and parsed on first use.
    pub async fn document(&self) -> Result<Arc<IndexDocument>> {
        self.document.get_or_try_init(|| self.load()).await.map(Arc::clone)
    }

    async fn load(&self) -> Result<Arc<IndexDocument>> {
        log::info!(target: LOG_TARGET, "Fetching package index from {}", self.index_url);

        let response = resilient_get(&self.client, &self.index_url, self.retry, self.request_timeout)
            .await
            .into_app_err_with(|| format!("requesting '{}'", self.index_url))?;
        if !response.status().is_success() {
            bail!("could not fetch package index '{}': HTTP {}", self.index_url, response.status());
        }

        let xml = response.text().await.into_app_err("reading package index")?;
        let document = IndexDocument::parse(&xml).into_app_err_with(|| format!("parsing package index '{}'", self.index_url))?;
        log::info!(target: LOG_TARGET, "Package index lists {} packages", document.packages.len());
        Ok(Arc::new(document))
    }

    /// Channel id to channel name, e.g. `channel-0` → `stable`.
    pub async fn channels(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.document().await?.channels.clone())
    }

    /// Packages whose path is `prefix` or starts with `prefix;`; all packages without a prefix.
    ///
    /// Ordered by path, with version suffixes in version order, then newest revision first.
    pub async fn list_packages(&self, prefix: Option<&str>) -> Result<Vec<PackageDescriptor>> {
        let document = self.document().await?;
        let mut packages: Vec<PackageDescriptor> = document
            .packages
            .iter()
            .filter(|package| prefix.is_none_or(|prefix| matches_prefix(&package.path, prefix)))
            .cloned()
            .collect();

        packages.sort_by(|a, b| self.compare_listing(a, b));
        Ok(packages)
    }

    fn compare_listing(&self, a: &PackageDescriptor, b: &PackageDescriptor) -> Ordering {
        fn stem(p: &PackageDescriptor) -> &str {
            p.path.rsplit_once(';').map_or(p.path.as_str(), |(stem, _)| stem)
        }

        stem(a)
            .cmp(stem(b))
            .then_with(|| self.ordering.compare(a.version_suffix(), b.version_suffix()))
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| b.revision.cmp(&a.revision))
    }

    /// The highest revision of `path`, optionally restricted to one channel.
    pub async fn latest_package(&self, path: &str, channel: Option<&str>) -> Result<PackageDescriptor> {
        let document = self.document().await?;
        document
            .packages
            .iter()
            .filter(|package| package.path == path)
            .filter(|package| channel.is_none_or(|channel| package.channel.as_deref() == Some(channel)))
            .max_by_key(|package| package.revision)
            .cloned()
            .ok_or_else(|| match channel {
                Some(channel) => app_err!("package '{path}' not found in channel '{channel}'"),
                None => app_err!("package '{path}' not found"),
            })
    }

    /// The archive to download for this host.
    pub fn best_archive_url(&self, descriptor: &PackageDescriptor) -> Result<String> {
        self.best_archive_url_for(descriptor, HostOs::current())
    }

    /// The archive to download on `host`.
    ///
    /// A lone archive is used whatever its host. With several, the one built
    /// for `host` is required.
    pub fn best_archive_url_for(&self, descriptor: &PackageDescriptor, host: Option<HostOs>) -> Result<String> {
        match descriptor.archives.as_slice() {
            [] => bail!("package '{}' {} has no archives", descriptor.path, descriptor.revision),
            [only] => Ok(only.url.clone()),
            variants => {
                let available: Vec<String> = variants
                    .iter()
                    .map(|variant| variant.host_os.map_or_else(|| "any".to_owned(), |os| os.to_string()))
                    .collect();
                let host = host.ok_or_else(|| {
                    app_err!(
                        "package '{}' {} only has host-specific archives ({}) and this host is not one of them",
                        descriptor.path,
                        descriptor.revision,
                        available.join(", ")
                    )
                })?;

                variants
                    .iter()
                    .find(|variant| variant.host_os == Some(host))
                    .map(|variant| variant.url.clone())
                    .ok_or_else(|| {
                        app_err!(
                            "package '{}' {} has no archive for {host} (available: {})",
                            descriptor.path,
                            descriptor.revision,
                            available.join(", ")
                        )
                    })
            }
        }
    }
}

fn matches_prefix(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix).is_some_and(|rest| rest.is_empty() || rest.starts_with(';'))
}
