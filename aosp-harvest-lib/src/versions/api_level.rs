//! API levels and the platform releases that shipped them.

use serde::{Deserialize, Serialize};

/// Platform releases per API level.
///
/// The build numbers page lists API levels by version range only, so the
/// exact releases are kept here. Levels 1-3, 11, 12 and 20 have no source tags.
pub const API_LEVEL_RELEASES: &[(u32, &[&str])] = &[
    (1, &["1.0"]),
    (2, &["1.1"]),
    (3, &["1.5"]),
    (4, &["1.6"]),
    (5, &["2.0"]),
    (6, &["2.0.1"]),
    (7, &["2.1"]),
    (8, &["2.2", "2.2.1", "2.2.2", "2.2.3"]),
    (9, &["2.3", "2.3.1", "2.3.2"]),
    (10, &["2.3.3", "2.3.4", "2.3.5", "2.3.6", "2.3.7"]),
    (11, &["3.0"]),
    (12, &["3.1"]),
    (13, &["3.2", "3.2.1", "3.2.2", "3.2.4", "3.2.6"]),
    (14, &["4.0.1", "4.0.2"]),
    (15, &["4.0.3", "4.0.4"]),
    (16, &["4.1.1", "4.1.2"]),
    (17, &["4.2", "4.2.1", "4.2.2"]),
    (18, &["4.3", "4.3.1"]),
    (19, &["4.4", "4.4.1", "4.4.2", "4.4.3", "4.4.4"]),
    (20, &["4.4w"]),
    (21, &["5.0.0", "5.0.1", "5.0.2", "5.1.0"]),
    (22, &["5.1.1"]),
    (23, &["6.0.0", "6.0.1"]),
    (24, &["7.0.0"]),
    (25, &["7.1.0", "7.1.1", "7.1.2"]),
    (26, &["8.0.0"]),
    (27, &["8.1.0"]),
    (28, &["9.0.0"]),
    (29, &["10.0.0"]),
    (30, &["11.0.0"]),
    (31, &["12.0.0"]),
    (32, &["12.1.0"]),
    (33, &["13.0.0"]),
    (34, &["14.0.0"]),
    (35, &["15.0.0"]),
    (36, &["16.0.0"]),
];

/// Levels whose framework sources are not published under any tag.
const UNTAGGED_LEVELS: [u32; 2] = [11, 12];

/// Releases shipped with API level `api`.
#[must_use]
pub fn releases_for(api: u32) -> &'static [&'static str] {
    API_LEVEL_RELEASES
        .iter()
        .find(|(level, _)| *level == api)
        .map_or(&[], |(_, releases)| releases)
}

/// Whether `version` is listed under any API level.
#[must_use]
pub fn is_known_release(version: &str) -> bool {
    API_LEVEL_RELEASES.iter().any(|(_, releases)| releases.contains(&version))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiLevel {
    /// Codename, when the release has one.
    pub name: Option<String>,
    /// Version range as published, e.g. `8.0.0` or `4.4 - 4.4.4`.
    pub version_range: String,
    /// Platform releases shipped with this level, oldest first.
    pub versions: Vec<String>,
    pub api: u32,
}

impl ApiLevel {
    #[must_use]
    pub fn new(api: u32, name: Option<String>, version_range: impl Into<String>) -> Self {
        Self {
            name,
            version_range: version_range.into(),
            versions: releases_for(api).iter().map(|release| (*release).to_owned()).collect(),
            api,
        }
    }

    /// API 20 is missing from the published table.
    #[must_use]
    pub fn kitkat_wear() -> Self {
        Self::new(20, Some("KitKat Wear".to_owned()), "4.4w")
    }

    /// Whether framework sources for this level can be fetched by tag.
    ///
    /// Levels below 4 predate the tags, and 11, 12 and 20 never had any.
    #[must_use]
    pub fn has_framework_sources(&self) -> bool {
        self.api >= 4 && !UNTAGGED_LEVELS.contains(&self.api) && self.api != 20
    }
}

impl core::fmt::Display for ApiLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.name {
            Some(name) => f.write_str(name),
            None => write!(f, "API: {}", self.api),
        }
    }
}
