//! Path utilities for safe filesystem operations.

/// Sanitize a string for use as a single path component
///
/// Removes path traversal sequences and characters that are unsafe in file
/// names, so that refs such as `refs/heads/main` map to one flat directory
/// name.
///
/// # Examples
///
/// ```ignore
/// // This is an internal utility function
/// assert_eq!(sanitize_path_component("refs/heads/main"), "refs_heads_main");
/// assert_eq!(sanitize_path_component("../../etc/passwd"), "______etc_passwd");
/// ```
#[must_use]
pub fn sanitize_path_component(s: &str) -> String {
    // ".." goes first; a single "." stays so tags like "android-14.0.0_r1" survive
    let s = s.replace("..", "__");
    s.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_")
}

/// Split a slash-separated remote path into sanitized components, dropping
/// empty and `.` segments.
pub fn sanitized_components(path: &str) -> impl Iterator<Item = String> + '_ {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .map(sanitize_path_component)
}

/// Last segment of a slash-separated remote path.
#[must_use]
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parent of a slash-separated remote path, or `""` at the top.
#[must_use]
pub fn parent(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(head, _)| head)
}
