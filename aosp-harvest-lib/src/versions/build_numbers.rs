//! The "codenames, tags and build numbers" page of source.android.com.
//!
//! Three tables are read from it: the API level table that precedes the
//! `source-code-tags-and-builds` heading, the build table that follows it, and
//! the Honeycomb GPL table under `honeycomb-gpl-modules`. The page is HTML5, so
//! each table is cut out on its own and read with a lenient XML reader.

use super::api_level::{ApiLevel, is_known_release};
use super::build_tag::{BuildTag, BuildVersion, latest_build};
use crate::Result;
use crate::crawl::{DEFAULT_REQUEST_TIMEOUT, RetryPolicy, VersionOrdering, resilient_get};
use core::time::Duration;
use ohno::{IntoAppError, app_err, bail};
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};
use tokio::sync::OnceCell;

const LOG_TARGET: &str = "  versions";

pub const BUILD_NUMBERS_URL: &str = "https://source.android.com/docs/setup/about/build-numbers";

const BUILDS_HEADING: &str = "source-code-tags-and-builds";
const HONEYCOMB_HEADING: &str = "honeycomb-gpl-modules";

static API_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"API level (\d+)").expect("invalid regex"));

/// Everything read from the page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildNumbers {
    /// Newest API level first.
    pub api_levels: Vec<ApiLevel>,
    /// Oldest build first.
    pub builds: Vec<BuildVersion>,
}

impl BuildNumbers {
    pub fn parse(html: &str) -> Result<Self> {
        let heading = heading_offset(html, BUILDS_HEADING).ok_or_else(|| app_err!("page has no '{BUILDS_HEADING}' section"))?;

        let (before, after) = html.split_at(heading);
        let api_table = last_table(before).ok_or_else(|| app_err!("no API level table before '{BUILDS_HEADING}'"))?;
        let build_table = first_table(after).ok_or_else(|| app_err!("no build table after '{BUILDS_HEADING}'"))?;

        let mut builds = table_rows(build_table)?
            .into_iter()
            .filter(|row| row.len() >= 2)
            .map(|row| {
                Ok(BuildVersion {
                    tag: BuildTag::parse(&row[1])?,
                    name: cell(&row, 2),
                    build_id: row[0].clone(),
                    security_patch_level: cell(&row, 4),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(offset) = heading_offset(html, HONEYCOMB_HEADING)
            && let Some(table) = html.get(offset..).and_then(first_table)
        {
            for row in table_rows(table)?.into_iter().filter(|row| row.len() >= 2) {
                builds.push(BuildVersion {
                    tag: BuildTag::parse(&row[1])?,
                    name: Some("Honeycomb".to_owned()),
                    build_id: row[0].clone(),
                    security_patch_level: None,
                });
            }
        }
        builds.sort();

        let unknown: BTreeSet<&str> = builds
            .iter()
            .map(|build| build.tag.version.as_str())
            .filter(|version| !is_known_release(version))
            .collect();
        if !unknown.is_empty() {
            log::warn!(target: LOG_TARGET, "Releases without a known API level: {unknown:?}");
        }

        let mut api_levels = table_rows(api_table)?
            .into_iter()
            .filter(|row| row.len() >= 3)
            .map(|row| {
                let api = API_REGEX
                    .captures(&row[2])
                    .and_then(|caps| caps.get(1))
                    .and_then(|m| m.as_str().parse::<u32>().ok())
                    .ok_or_else(|| app_err!("no API level in '{}'", row[2]))?;
                let name = cell(&row, 0).filter(|codename| !codename.contains("no codename"));
                Ok(ApiLevel::new(api, name, row[1].clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        if !api_levels.iter().any(|level| level.api == 20) {
            api_levels.push(ApiLevel::kitkat_wear());
        }
        api_levels.sort_by(|a, b| b.api.cmp(&a.api));

        Ok(Self { api_levels, builds })
    }

    /// Builds of platform release `version`, oldest first.
    pub fn builds_of<'a>(&'a self, version: &'a str) -> impl Iterator<Item = &'a BuildVersion> {
        self.builds.iter().filter(move |build| build.tag.matches_version(version))
    }

    /// The newest build of `version`, optionally only security or only regular tags.
    #[must_use]
    pub fn latest_build(&self, version: &str, security: Option<bool>) -> Option<&BuildVersion> {
        latest_build(&self.builds, version, security)
    }

    #[must_use]
    pub fn api_level(&self, api: u32) -> Option<&ApiLevel> {
        self.api_levels.iter().find(|level| level.api == api)
    }

    /// Distinct platform releases with published builds, oldest first.
    #[must_use]
    pub fn releases(&self) -> Vec<&str> {
        let mut releases: Vec<&str> = self.builds.iter().map(|build| build.tag.version.as_str()).collect();
        let ordering = VersionOrdering::new();
        releases.sort_by(|a, b| ordering.compare(a, b));
        releases.dedup();
        releases
    }
}

/// A trimmed, whitespace-collapsed cell, `None` when empty.
fn cell(row: &[String], index: usize) -> Option<String> {
    row.get(index).filter(|text| !text.is_empty()).cloned()
}

/// Byte offset of the element carrying `id`.
fn heading_offset(html: &str, id: &str) -> Option<usize> {
    let needle = format!("id=\"{id}\"");
    let at = html.find(&needle)?;
    html.get(..at)?.rfind('<')
}

fn first_table(html: &str) -> Option<&str> {
    let start = html.find("<table")?;
    let end = start + html.get(start..)?.find("</table>")? + "</table>".len();
    html.get(start..end)
}

fn last_table(html: &str) -> Option<&str> {
    let start = html.rfind("<table")?;
    let end = start + html.get(start..)?.find("</table>")? + "</table>".len();
    html.get(start..end)
}

/// The text of every `<td>` cell, row by row. Header rows come out empty.
fn table_rows(table: &str) -> Result<Vec<Vec<String>>> {
    let mut reader = Reader::from_str(table);
    let config = reader.config_mut();
    config.check_end_names = false;
    config.allow_unmatched_ends = true;

    let mut rows = Vec::new();
    let mut row: Option<Vec<String>> = None;
    let mut current: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => match element.local_name().as_ref() {
                b"tr" => {
                    rows.extend(row.replace(Vec::new()));
                }
                b"td" => current = Some(String::new()),
                _ => {}
            },
            Ok(Event::End(element)) => match element.local_name().as_ref() {
                b"td" => {
                    if let (Some(text), Some(row)) = (current.take(), row.as_mut()) {
                        row.push(collapse_whitespace(&text));
                    }
                }
                b"tr" => rows.extend(row.take()),
                _ => {}
            },
            Ok(Event::Text(text)) => {
                if let Some(current) = current.as_mut() {
                    let decoded = text
                        .unescape_with(|entity| (entity == "nbsp").then_some(" "))
                        .unwrap_or_else(|_| Cow::Owned(String::from_utf8_lossy(&text).into_owned()));
                    current.push_str(&decoded);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => bail!("malformed table at byte {}: {e}", reader.buffer_position()),
        }
    }
    rows.extend(row);

    Ok(rows.into_iter().filter(|row| !row.is_empty()).collect())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lazily fetched view over the build numbers page.
#[derive(Debug)]
pub struct BuildNumbersPage {
    client: reqwest::Client,
    url: String,
    retry: RetryPolicy,
    timeout: Duration,
    parsed: OnceCell<Arc<BuildNumbers>>,
}

impl BuildNumbersPage {
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            retry: RetryPolicy::default(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            parsed: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn with_retry(self, retry: RetryPolicy, timeout: Duration) -> Self {
        Self { retry, timeout, ..self }
    }

    /// The page, fetched and parsed on first use.
    pub async fn get(&self) -> Result<Arc<BuildNumbers>> {
        self.parsed.get_or_try_init(|| self.load()).await.map(Arc::clone)
    }

    async fn load(&self) -> Result<Arc<BuildNumbers>> {
        log::info!(target: LOG_TARGET, "Fetching build numbers from {}", self.url);

        let response = resilient_get(&self.client, &self.url, self.retry, self.timeout)
            .await
            .into_app_err_with(|| format!("requesting '{}'", self.url))?;
        if !response.status().is_success() {
            bail!("could not fetch build numbers '{}': HTTP {}", self.url, response.status());
        }

        let html = response.text().await.into_app_err("reading build numbers page")?;
        let parsed = BuildNumbers::parse(&html).into_app_err_with(|| format!("parsing '{}'", self.url))?;
        log::info!(
            target: LOG_TARGET,
            "Found {} API levels and {} builds",
            parsed.api_levels.len(),
            parsed.builds.len()
        );
        Ok(Arc::new(parsed))
    }
}
