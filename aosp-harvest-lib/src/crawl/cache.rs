//! On-disk read-through/write-through cache for remote documents.
//!
//! [`DocumentCache`] stores the raw text of fetched documents under a root
//! directory, keyed by the sanitized reference and the document's path. It is
//! advisory: a miss, an unreadable entry, or a disabled cache all mean the
//! caller goes to the network instead.

use super::location::DocumentLocation;
use super::path_utils::{basename, sanitize_path_component, sanitized_components};
use crate::Result;
use ohno::IntoAppError;
use std::io;
use std::path::{Path, PathBuf};

const LOG_TARGET: &str = "     cache";

/// How cache keys map onto the directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLayout {
    /// `<root>/<reference>/<basename>`. Suits document sets with unique file names.
    Flat,

    /// `<root>/<reference>/<repository>/<relative path>`. Needed when many
    /// documents share a file name, such as `AndroidManifest.xml`.
    Mirrored,
}

/// A directory-backed text cache for remote documents.
#[derive(Debug, Clone)]
pub struct DocumentCache {
    dir: PathBuf,
    layout: CacheLayout,
    ignore: bool,
}

impl DocumentCache {
    /// Create a new cache. With `ignore_cache` set, every lookup misses but writes still land.
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>, layout: CacheLayout, ignore_cache: bool) -> Self {
        Self {
            dir: cache_dir.into(),
            layout,
            ignore: ignore_cache,
        }
    }

    /// Returns the cache directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether lookups are served from disk.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !self.ignore
    }

    /// Where the entry for `(reference, location)` lives.
    #[must_use]
    pub fn entry_path(&self, reference: &str, location: &DocumentLocation) -> PathBuf {
        let mut path = self.dir.join(sanitize_path_component(reference));
        match self.layout {
            CacheLayout::Flat => path.push(sanitize_path_component(basename(location.relative_path()))),
            CacheLayout::Mirrored => {
                path.extend(sanitized_components(location.repository()));
                path.extend(sanitized_components(location.relative_path()));
            }
        }
        path
    }

    /// Look up a cached document.
    pub async fn get(&self, reference: &str, location: &DocumentLocation) -> Option<String> {
        if self.ignore {
            return None;
        }

        let path = self.entry_path(reference, location);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                log::debug!(target: LOG_TARGET, "Cache hit for {location} at {reference}");
                Some(text)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::trace!(target: LOG_TARGET, "Cache miss for {location} at {reference}");
                None
            }
            Err(e) => {
                log::debug!(target: LOG_TARGET, "Ignoring unreadable cache entry '{}': {e:#}", path.display());
                None
            }
        }
    }

    /// Store a document, replacing any previous entry for the same key.
    ///
    /// The text is written with a single whole-buffer write. Concurrent writers
    /// for one key always carry identical content, so no locking is needed.
    pub async fn put(&self, reference: &str, location: &DocumentLocation, text: &str) -> Result<()> {
        let path = self.entry_path(reference, location);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .into_app_err_with(|| format!("creating directory '{}'", parent.display()))?;
        }

        tokio::fs::write(&path, text)
            .await
            .into_app_err_with(|| format!("writing cache file '{}'", path.display()))?;

        log::debug!(target: LOG_TARGET, "Cached {location} at {reference}");
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn manifest() -> DocumentLocation {
        DocumentLocation::new("platform/packages/apps/Contacts", "/app/src/main/AndroidManifest.xml")
    }

    #[test]
    fn flat_layout_uses_reference_and_basename() {
        let cache = DocumentCache::new("/cache", CacheLayout::Flat, false);
        assert_eq!(
            cache.entry_path("refs/heads/main", &manifest()),
            Path::new("/cache/refs_heads_main/AndroidManifest.xml")
        );
    }

    #[test]
    fn mirrored_layout_keeps_repository_structure() {
        let cache = DocumentCache::new("/cache", CacheLayout::Mirrored, false);
        assert_eq!(
            cache.entry_path("refs/heads/main", &manifest()),
            Path::new("/cache/refs_heads_main/platform/packages/apps/Contacts/app/src/main/AndroidManifest.xml")
        );
    }

    #[test]
    fn mirrored_layout_cannot_escape_root() {
        let cache = DocumentCache::new("/cache", CacheLayout::Mirrored, false);
        let location = DocumentLocation::new("../..", "/../../etc/passwd");
        let path = cache.entry_path("../x", &location);
        assert!(path.starts_with("/cache"));
        assert!(!path.components().any(|c| c == std::path::Component::ParentDir));
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    async fn put_then_get_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = DocumentCache::new(tmp.path(), CacheLayout::Mirrored, false);

        cache.put("refs/heads/main", &manifest(), "<manifest/>").await.unwrap();

        assert_eq!(cache.get("refs/heads/main", &manifest()).await.as_deref(), Some("<manifest/>"));
        assert_eq!(cache.get("refs/heads/other", &manifest()).await, None);
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    async fn writing_identical_content_twice_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = DocumentCache::new(tmp.path(), CacheLayout::Flat, false);

        cache.put("refs/heads/main", &manifest(), "same text\n").await.unwrap();
        cache.put("refs/heads/main", &manifest(), "same text\n").await.unwrap();

        assert_eq!(cache.get("refs/heads/main", &manifest()).await.as_deref(), Some("same text\n"));
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    async fn concurrent_identical_writes_do_not_fail() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = DocumentCache::new(tmp.path(), CacheLayout::Flat, false);
        let location = manifest();

        let results = futures::future::join_all((0..4).map(|_| cache.put("refs/heads/main", &location, "payload"))).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(cache.get("refs/heads/main", &location).await.as_deref(), Some("payload"));
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    async fn ignored_cache_misses_but_still_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = DocumentCache::new(tmp.path(), CacheLayout::Flat, true);

        cache.put("refs/heads/main", &manifest(), "text").await.unwrap();

        assert!(!cache.is_enabled());
        assert_eq!(cache.get("refs/heads/main", &manifest()).await, None);
        let reader = DocumentCache::new(tmp.path(), CacheLayout::Flat, false);
        assert_eq!(reader.get("refs/heads/main", &manifest()).await.as_deref(), Some("text"));
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    async fn missing_entry_is_a_miss() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = DocumentCache::new(tmp.path(), CacheLayout::Flat, false);
        assert_eq!(cache.get("refs/heads/main", &manifest()).await, None);
    }
}
