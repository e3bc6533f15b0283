//! Ordering for dotted, alphanumeric version strings such as `8.1.0` or `4.0.3r1`.

use core::cmp::Ordering;
use regex::Regex;
use std::sync::LazyLock;

static SEGMENT_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)([a-zA-Z]*)").expect("invalid regex"));

/// One `digits+letters*` run of a version string.
///
/// The numeric part is kept as text with leading zeros stripped so that
/// arbitrarily long numbers compare correctly without overflowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment<'a> {
    number: &'a str,
    suffix: &'a str,
}

impl Segment<'_> {
    /// Stand-in for a segment that one side lacks.
    const MISSING: Segment<'static> = Segment { number: "", suffix: "" };
}

impl Ord for Segment<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number
            .len()
            .cmp(&other.number.len())
            .then_with(|| self.number.cmp(other.number))
            .then_with(|| self.suffix.cmp(other.suffix))
    }
}

impl PartialOrd for Segment<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn segments(version: &str) -> Vec<Segment<'_>> {
    SEGMENT_REGEX
        .captures_iter(version)
        .filter_map(|caps| {
            let number = caps.get(1)?.as_str().trim_start_matches('0');
            let suffix = caps.get(2).map_or("", |m| m.as_str());
            Some(Segment { number, suffix })
        })
        .collect()
}

/// Stateless comparator for version strings.
///
/// Each string is split into `(number, letters)` segments which are compared
/// pairwise: numerically first, then by suffix. A segment missing on one side
/// counts as `(0, "")`. When that leaves a tie, the string with more segments
/// wins, which makes `8.1.0` sort after `8.1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionOrdering;

impl VersionOrdering {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }

        let left = segments(a);
        let right = segments(b);

        for index in 0..left.len().max(right.len()) {
            let l = left.get(index).copied().unwrap_or(Segment::MISSING);
            let r = right.get(index).copied().unwrap_or(Segment::MISSING);
            match l.cmp(&r) {
                Ordering::Equal => {}
                other => return other,
            }
        }

        // Only zero segments were left over; the longer version is the later one.
        left.len().cmp(&right.len())
    }

    /// Sort `items` in ascending version order using `key` to extract the version text.
    pub fn sort_by_key<T>(&self, items: &mut [T], key: impl Fn(&T) -> &str) {
        items.sort_by(|a, b| self.compare(key(a), key(b)));
    }
}
