//! Source tags such as `android-14.0.0_r21` and the builds they name.

use crate::Result;
use crate::crawl::VersionOrdering;
use core::cmp::Ordering;
use ohno::bail;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^android(-security)?-(.*)_r(.*)$").expect("invalid regex"));

/// A parsed `android[-security]-<version>_r<revision>` tag.
///
/// Tags order by `<version>_<revision>` under [`VersionOrdering`], so
/// `android-8.1.0_r9` sorts before `android-8.1.0_r10`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildTag {
    pub tag: String,
    pub version: String,
    pub revision: String,
    pub is_security: bool,
}

impl BuildTag {
    pub fn parse(tag: &str) -> Result<Self> {
        let tag = tag.trim();
        let Some(caps) = TAG_REGEX.captures(tag) else {
            bail!("'{tag}' is not an Android build tag");
        };

        Ok(Self {
            tag: tag.to_owned(),
            version: caps.get(2).map_or("", |m| m.as_str()).to_owned(),
            revision: caps.get(3).map_or("", |m| m.as_str()).to_owned(),
            is_security: caps.get(1).is_some(),
        })
    }

    /// Whether this tag belongs to platform release `version`.
    #[must_use]
    pub fn matches_version(&self, version: &str) -> bool {
        VersionOrdering::new().compare(&self.version, version) == Ordering::Equal
    }

    #[must_use]
    pub fn short_version(&self) -> String {
        format!("{}_{}", self.version, self.revision)
    }
}

impl Ord for BuildTag {
    fn cmp(&self, other: &Self) -> Ordering {
        VersionOrdering::new()
            .compare(&self.short_version(), &other.short_version())
            .then_with(|| self.tag.cmp(&other.tag))
    }
}

impl PartialOrd for BuildTag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl core::fmt::Display for BuildTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.tag)
    }
}

/// One row of the published build table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildVersion {
    #[serde(flatten)]
    pub tag: BuildTag,
    /// Release name, e.g. `Android14`.
    pub name: Option<String>,
    pub build_id: String,
    pub security_patch_level: Option<String>,
}

impl Ord for BuildVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tag.cmp(&other.tag).then_with(|| self.build_id.cmp(&other.build_id))
    }
}

impl PartialOrd for BuildVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The newest build of platform release `version`, optionally restricted to
/// security or non-security tags.
#[must_use]
pub fn latest_build<'a>(builds: &'a [BuildVersion], version: &str, security: Option<bool>) -> Option<&'a BuildVersion> {
    builds
        .iter()
        .filter(|build| build.tag.matches_version(version))
        .filter(|build| security.is_none_or(|security| build.tag.is_security == security))
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(tag: &str, build_id: &str) -> BuildVersion {
        BuildVersion {
            tag: BuildTag::parse(tag).unwrap(),
            name: None,
            build_id: build_id.to_owned(),
            security_patch_level: None,
        }
    }

    #[test]
    fn tags_are_split() {
        let tag = BuildTag::parse("android-14.0.0_r21").unwrap();
        assert_eq!(tag.version, "14.0.0");
        assert_eq!(tag.revision, "21");
        assert!(!tag.is_security);

        let security = BuildTag::parse(" android-security-10.0.0_r75 ").unwrap();
        assert_eq!(security.tag, "android-security-10.0.0_r75");
        assert_eq!(security.version, "10.0.0");
        assert!(security.is_security);

        assert!(BuildTag::parse("refs/heads/main").is_err());
        assert!(BuildTag::parse("android-14.0.0").is_err());
    }

    #[test]
    fn revisions_order_numerically() {
        let older = BuildTag::parse("android-8.1.0_r9").unwrap();
        let newer = BuildTag::parse("android-8.1.0_r10").unwrap();
        assert!(older < newer);

        let next_release = BuildTag::parse("android-9.0.0_r1").unwrap();
        assert!(newer < next_release);
    }

    #[test]
    fn versions_match_exactly() {
        let tag = BuildTag::parse("android-4.0.3_r1").unwrap();
        assert!(tag.matches_version("4.0.3"));
        assert!(!tag.matches_version("4.0.4"));
        assert!(!tag.matches_version("4.0"));
    }

    #[test]
    fn latest_build_filters_by_security() {
        let builds = [
            build("android-10.0.0_r1", "QP1A.190711.019"),
            build("android-10.0.0_r47", "QQ3A.200805.001"),
            build("android-security-10.0.0_r75", "QSV1.210329.001"),
            build("android-11.0.0_r1", "RP1A.200720.009"),
        ];

        assert_eq!(latest_build(&builds, "10.0.0", Some(false)).unwrap().build_id, "QQ3A.200805.001");
        assert_eq!(latest_build(&builds, "10.0.0", Some(true)).unwrap().build_id, "QSV1.210329.001");
        assert!(latest_build(&builds, "12.0.0", None).is_none());
    }

    #[test]
    fn serialized_build_is_flat() {
        let json = serde_json::to_value(build("android-14.0.0_r21", "UQ1A.240205.002")).unwrap();
        assert_eq!(json["tag"], "android-14.0.0_r21");
        assert_eq!(json["version"], "14.0.0");
        assert_eq!(json["revision"], "21");
        assert_eq!(json["is_security"], false);
        assert_eq!(json["build_id"], "UQ1A.240205.002");
        assert!(json["name"].is_null());
    }
}
