use super::Host;
use super::common::{Common, CommonArgs, write_json};
use crate::Result;
use crate::crawl::{CacheLayout, DocumentCache, DocumentLocation, RequestTracker, ResilientFetcher, TrackedTopic};
use crate::records::{FrameworkPermissions, parse_permission_manifest, parse_string_resources};
use crate::versions::{ApiLevel, BuildNumbers};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use futures::stream::{FuturesUnordered, StreamExt};
use ohno::{IntoAppError, bail};
use std::io::Write;

const LOG_TARGET: &str = "permission";

/// Repository holding the framework manifest and its resources.
const FRAMEWORK_REPOSITORY: &str = "platform/frameworks/base";

const FRAMEWORK_MANIFEST: &str = "/core/res/AndroidManifest.xml";

#[derive(Parser, Debug)]
pub struct PermissionsArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Ref whose permissions are written as `permissions-REL.json`
    #[arg(long, value_name = "REF", default_value = "refs/heads/main")]
    pub reference: String,

    /// Directory receiving the `permissions/` folder
    #[arg(long, short = 'o', value_name = "PATH", default_value = ".")]
    pub output_dir: Utf8PathBuf,

    /// Only these API levels; every level with published sources when omitted
    #[arg(long = "api", value_name = "LEVEL")]
    pub api_levels: Vec<u32>,

    /// Skip the per-API-level files and only write the `REL` ones
    #[arg(long)]
    pub release_only: bool,
}

/// The framework manifest and string resources at one ref.
#[derive(Debug)]
struct FrameworkSource<'a> {
    fetcher: &'a ResilientFetcher,
    cache: &'a DocumentCache,
    tracker: &'a RequestTracker,
    manifest: DocumentLocation,
    strings: DocumentLocation,
}

impl<'a> FrameworkSource<'a> {
    fn new(fetcher: &'a ResilientFetcher, cache: &'a DocumentCache, tracker: &'a RequestTracker, language: Option<&str>) -> Self {
        let values = language.map_or_else(|| "values".to_owned(), |language| format!("values-{}", language.trim()));
        Self {
            fetcher,
            cache,
            tracker,
            manifest: DocumentLocation::new(FRAMEWORK_REPOSITORY, FRAMEWORK_MANIFEST),
            strings: DocumentLocation::new(FRAMEWORK_REPOSITORY, format!("/core/res/res/{values}/strings.xml")),
        }
    }

    /// Permissions declared at `reference`; `None` when the manifest does not exist there.
    async fn load(&self, reference: &str) -> Result<Option<FrameworkPermissions>> {
        // Tags never move, so only they are served from the cache.
        let use_cache = !reference.starts_with("refs/");

        let Some(manifest) = self.document(&self.manifest, reference, use_cache).await? else {
            return Ok(None);
        };
        let Some(strings) = self.document(&self.strings, reference, use_cache).await? else {
            bail!("{} does not exist at {reference}", self.strings);
        };

        let strings = parse_string_resources(&strings).into_app_err_with(|| format!("parsing {} at {reference}", self.strings))?;
        let declared =
            parse_permission_manifest(&manifest, &strings).into_app_err_with(|| format!("parsing {} at {reference}", self.manifest))?;
        log::debug!(
            target: LOG_TARGET,
            "{reference}: {} permissions in {} groups",
            declared.permissions.len(),
            declared.groups.len()
        );
        Ok(Some(declared))
    }

    async fn document(&self, location: &DocumentLocation, reference: &str, use_cache: bool) -> Result<Option<String>> {
        if use_cache && let Some(text) = self.cache.get(reference, location).await {
            return Ok(Some(text));
        }

        self.tracker.add_requests(TrackedTopic::Documents, 1);
        let fetched = self.fetcher.fetch(location, reference, self.tracker).await;
        self.tracker.complete_request(TrackedTopic::Documents);

        let text = fetched?;
        if let Some(text) = &text
            && let Err(e) = self.cache.put(reference, location, text).await
        {
            log::warn!(target: LOG_TARGET, "Could not cache {location}: {e}");
        }
        Ok(text)
    }

    /// Write the permissions of the newest regular build of `level`.
    ///
    /// Releases are tried newest first; one whose tag lacks the framework
    /// manifest is skipped in favor of the next.
    async fn dump_api_level(&self, page: &BuildNumbers, level: &ApiLevel, dir: &Utf8Path) -> Result<Option<String>> {
        for version in level.versions.iter().rev() {
            let Some(build) = page.latest_build(version, Some(false)) else {
                continue;
            };

            let tag = &build.tag.tag;
            if let Some(declared) = self.load(tag).await.into_app_err_with(|| format!("reading API {} at {tag}", level.api))? {
                write_json(&dir.join(format!("permissions-{}.json", level.api)), &declared)?;
                return Ok(Some(tag.clone()));
            }
            log::debug!(target: LOG_TARGET, "API {}: {tag} has no framework manifest", level.api);
        }
        Ok(None)
    }
}

/// Write the framework permissions of a ref and of every API level.
pub async fn dump_permissions<H: Host>(host: &mut H, args: &PermissionsArgs) -> Result<()> {
    let common = Common::new(&args.common).await?;
    let tracker = common.tracker();
    let fetcher = common.fetcher();
    let cache = common.document_cache("permissions", CacheLayout::Flat);
    let source = FrameworkSource::new(&fetcher, &cache, &tracker, common.config.resource_language.as_deref());
    let dir = args.output_dir.join("permissions");

    common.progress.set_phase("Permissions");
    let result = dump_all(&common, &source, args, &dir).await;
    common.progress.done();
    let (release_count, written) = result?;

    let _ = writeln!(
        host.output(),
        "Wrote {release_count} permissions at {} and {} API levels to {dir}",
        args.reference,
        written.len()
    );
    for (api, tag) in &written {
        let _ = writeln!(host.output(), "  API {api:>2}: {tag}");
    }
    Ok(())
}

async fn dump_all(common: &Common, source: &FrameworkSource<'_>, args: &PermissionsArgs, dir: &Utf8Path) -> Result<(usize, Vec<(u32, String)>)> {
    let Some(release) = source.load(&args.reference).await? else {
        bail!("{FRAMEWORK_REPOSITORY}{FRAMEWORK_MANIFEST} does not exist at {}", args.reference);
    };
    write_json(&dir.join("permissions-REL.json"), &release)?;
    write_json(&dir.join("permissions-REL-SDK.json"), &release.sdk_only())?;

    if args.release_only {
        return Ok((release.permissions.len(), Vec::new()));
    }

    let page = common.build_numbers().get().await?;
    let page: &BuildNumbers = &page;
    let levels: Vec<&ApiLevel> = page
        .api_levels
        .iter()
        .filter(|level| level.has_framework_sources())
        .filter(|level| args.api_levels.is_empty() || args.api_levels.contains(&level.api))
        .collect();
    log::info!(target: LOG_TARGET, "Reading permissions of {} API levels", levels.len());

    let mut pending: FuturesUnordered<_> = levels
        .iter()
        .map(|level| async move { (level.api, source.dump_api_level(page, level, dir).await) })
        .collect();

    let mut written = Vec::new();
    while let Some((api, result)) = pending.next().await {
        match result? {
            Some(tag) => written.push((api, tag)),
            None => log::warn!(target: LOG_TARGET, "No published sources for API {api}"),
        }
    }
    written.sort_unstable();

    Ok((release.permissions.len(), written))
}
