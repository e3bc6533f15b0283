//! Setup shared by the commands that talk to the network.

use super::ProgressReporter;
use super::config::Config;
use crate::Result;
use crate::crawl::search::{QueryConfig, SearchSettings};
use crate::crawl::source::SourceClient;
use crate::crawl::{
    BatchSearchClient, CacheLayout, CacheLockGuard, CrawlPacing, DocumentCache, ManifestCrawlOrchestrator, ManifestParser, Progress,
    RequestTracker, ResilientFetcher, RetryPolicy, Throttler, acquire_cache_lock, http_client,
};
use crate::repository::RepositoryIndex;
use crate::versions::BuildNumbersPage;
use camino::Utf8PathBuf;
use clap::{Args, ValueEnum};
use core::time::Duration;
use directories::BaseDirs;
use ohno::{IntoAppError, app_err};
use std::path::PathBuf;
use std::sync::Arc;

/// Color mode configuration for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Always use colors
    Always,

    /// Never use colors
    Never,

    /// Use colors if the output is a terminal, otherwise don't use colors
    Auto,
}

impl ColorMode {
    fn enabled_for_stderr(self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => {
                use std::io::{IsTerminal, stderr};
                stderr().is_terminal()
            }
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No logging output
    None,

    /// Only error messages
    Error,

    /// Warning and error messages
    Warn,

    /// Info, warning, and error messages
    Info,

    /// Debug, info, warning, and error messages
    Debug,

    /// Trace, debug, info, warning, and error messages
    Trace,
}

/// Arguments shared by every command that fetches data
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Path to configuration file (default is `harvest.toml` in the current directory)
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<Utf8PathBuf>,

    /// Control when to use colored output
    #[arg(long, value_name = "WHEN", default_value = "auto")]
    pub color: ColorMode,

    /// Directory where fetched documents are cached
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<Utf8PathBuf>,

    /// Set the logging level for diagnostic output
    #[arg(long, value_name = "LEVEL", default_value = "none", global = true)]
    pub log_level: LogLevel,

    /// Ignore cached documents and fetch everything fresh
    #[arg(long)]
    pub ignore_cached: bool,
}

/// Everything a network command needs: configuration, HTTP plumbing, the cache and progress output.
pub struct Common {
    pub config: Config,
    pub progress: Arc<dyn Progress>,
    client: reqwest::Client,
    throttler: Arc<Throttler>,
    cache_dir: PathBuf,
    ignore_cached: bool,
    _cache_lock: CacheLockGuard,
}

impl core::fmt::Debug for Common {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Common")
            .field("config", &self.config)
            .field("cache_dir", &self.cache_dir)
            .field("ignore_cached", &self.ignore_cached)
            .finish_non_exhaustive()
    }
}

impl Common {
    /// Initialize logging, load the configuration and lock the cache directory.
    pub async fn new(args: &CommonArgs) -> Result<Self> {
        init_logging(args.log_level);

        let base_dir = Utf8PathBuf::from(".");
        let config = Config::load(&base_dir, args.config.as_ref())?;

        // Determine cache directory: use provided path or default cache directory for the platform
        let cache_dir = if let Some(cache_path) = &args.cache_dir {
            cache_path.as_std_path().to_path_buf()
        } else {
            BaseDirs::new()
                .ok_or_else(|| app_err!("could not determine cache directory"))?
                .cache_dir()
                .join("aosp-harvest")
        };

        std::fs::create_dir_all(&cache_dir).into_app_err_with(|| format!("creating cache directory '{}'", cache_dir.display()))?;
        let cache_lock = acquire_cache_lock(&cache_dir).await?;

        let delay = if args.log_level == LogLevel::None {
            Duration::from_millis(300)
        } else {
            Duration::from_hours(365 * 24)
        };
        let progress: Arc<dyn Progress> = Arc::new(ProgressReporter::new(delay, args.color.enabled_for_stderr()));

        Ok(Self {
            client: http_client(config.max_requests_per_host, config.connect_timeout, config.request_timeout)?,
            throttler: Throttler::new(config.max_requests_per_host),
            config,
            progress,
            cache_dir,
            ignore_cached: args.ignore_cached,
            _cache_lock: cache_lock,
        })
    }

    pub fn tracker(&self) -> RequestTracker {
        RequestTracker::new(&self.progress)
    }

    pub fn source_client(&self) -> SourceClient {
        SourceClient::new(self.client.clone(), self.config.source_base_url.as_str())
    }

    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.rate_limit_cooldown, self.config.rate_limit_max_retries)
    }

    /// Source requests sharing this run's throttler.
    pub fn fetcher(&self) -> ResilientFetcher {
        ResilientFetcher::new(self.source_client(), Arc::clone(&self.throttler), self.retry_policy())
            .with_request_timeout(self.config.request_timeout)
    }

    /// A document cache in the `name` subdirectory of the cache directory.
    pub fn document_cache(&self, name: &str, layout: CacheLayout) -> DocumentCache {
        DocumentCache::new(self.cache_dir.join(name), layout, self.ignore_cached)
    }

    pub fn search_client(&self) -> BatchSearchClient {
        let settings = SearchSettings {
            base_url: self.config.search_base_url.clone(),
            api_key: self.config.search_api_key.clone(),
            referer: self.config.search_referer.clone(),
            page_delay: self.config.search_page_delay,
            manifest_reference: self.config.manifest_reference.clone(),
        };
        BatchSearchClient::new(self.client.clone(), settings, self.fetcher())
    }

    /// A query over the configured project and repository.
    pub fn query(&self, query: &str) -> QueryConfig {
        QueryConfig::new(query, self.config.search_project.as_str(), self.config.search_repository.as_str())
            .with_page_size(self.config.page_size)
    }

    pub fn orchestrator<P: ManifestParser>(&self, parser: P) -> ManifestCrawlOrchestrator<P> {
        let cache = self.document_cache("documents", CacheLayout::Mirrored);
        let pacing = CrawlPacing {
            request_delay: self.config.request_delay,
            absent_delay: self.config.request_delay / 2,
        };
        ManifestCrawlOrchestrator::new(self.fetcher(), Some(cache), parser, pacing)
    }

    pub fn repository_index(&self) -> RepositoryIndex {
        RepositoryIndex::new(
            self.client.clone(),
            self.config.repository_index_url.as_str(),
            self.config.repository_download_url.as_str(),
        )
        .with_progress(Arc::clone(&self.progress))
        .with_retry(self.retry_policy(), self.config.request_timeout, self.config.download_timeout)
    }

    /// The page listing build tags and API levels.
    pub fn build_numbers(&self) -> BuildNumbersPage {
        BuildNumbersPage::new(self.client.clone(), self.config.build_numbers_url.as_str())
            .with_retry(self.retry_policy(), self.config.request_timeout)
    }

    /// Whether cached documents may be used.
    pub const fn use_cache(&self) -> bool {
        !self.ignore_cached
    }
}

/// Initialize logger based on log level
fn init_logging(log_level: LogLevel) {
    let level = match log_level {
        LogLevel::None => return,
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let env = env_logger::Env::default().filter_or("RUST_LOG", level);

    // A second command in the same process keeps the first logger.
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(matches!(log_level, LogLevel::Debug | LogLevel::Trace))
        .try_init();
}

/// Write `value` as pretty-printed JSON, creating parent directories as needed.
pub fn write_json<T: serde::Serialize + ?Sized>(path: &camino::Utf8Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_str().is_empty()
    {
        std::fs::create_dir_all(parent).into_app_err_with(|| format!("creating output directory '{parent}'"))?;
    }

    let file = std::fs::File::create(path).into_app_err_with(|| format!("creating '{path}'"))?;
    let mut writer = std::io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).into_app_err_with(|| format!("writing '{path}'"))?;
    std::io::Write::flush(&mut writer).into_app_err_with(|| format!("writing '{path}'"))?;
    Ok(())
}
