//! Android releases: API levels, source tags and the builds they name.
//!
//! [`BuildNumbersPage`] reads the published build numbers page once and
//! answers which tags exist for a platform release. [`API_LEVEL_RELEASES`]
//! supplies the releases behind each API level, which the page does not list.

mod api_level;
mod build_numbers;
mod build_tag;

pub use api_level::{API_LEVEL_RELEASES, ApiLevel, is_known_release, releases_for};
pub use build_numbers::{BUILD_NUMBERS_URL, BuildNumbers, BuildNumbersPage};
pub use build_tag::{BuildTag, BuildVersion, latest_build};
